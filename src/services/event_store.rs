//! Durable local store for captured events and their delivery jobs.
//!
//! Every capture is written as one event row plus one queue job in a single
//! transaction, so a crash can never leave one without the other. Status
//! changes are checked against [`EventStatus::can_transition_to`].

use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::queries::{self, NewEventRow};
use crate::models::event::{
    CaptureContext, EventKind, EventRecord, EventStatus, NewImageUpload, NewScan,
};
use crate::models::job::{ImageUploadPayload, JobType, QueueJob, ScanPayload};
use crate::services::clock::{Clock, SystemClock};

const CHANGE_FEED_CAPACITY: usize = 256;
const DEFAULT_LIST_LIMIT: i64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Event {0} not found")]
    NotFound(i64),
}

/// Persistence interface used by capture, the queue worker and observers.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a scan and its delivery job atomically; returns the event id.
    async fn record_scan(&self, scan: &NewScan, context: &CaptureContext)
        -> Result<i64, StoreError>;

    /// Persist an image capture and its upload job atomically; returns the event id.
    async fn record_image_upload(
        &self,
        upload: &NewImageUpload,
        context: &CaptureContext,
    ) -> Result<i64, StoreError>;

    async fn get_event(&self, id: i64) -> Result<Option<EventRecord>, StoreError>;

    /// Apply a status change. Returns `false` when the transition would move
    /// the record backwards and was ignored.
    async fn update_status(
        &self,
        id: i64,
        status: EventStatus,
        checksum: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Most recent events first.
    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError>;

    /// Change feed: every inserted or updated record is published here.
    fn subscribe(&self) -> broadcast::Receiver<EventRecord>;

    /// Delete settled events older than `age`; returns the number removed.
    async fn purge_older_than(&self, age: Duration) -> Result<u64, StoreError>;

    async fn oldest_job(&self) -> Result<Option<QueueJob>, StoreError>;

    async fn increment_retries(&self, job_id: i64) -> Result<i32, StoreError>;

    /// Set the referenced event's final status and delete the job in one transaction.
    async fn resolve_job(
        &self,
        job_id: i64,
        event_id: Option<i64>,
        status: EventStatus,
        checksum: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn delete_job(&self, job_id: i64) -> Result<(), StoreError>;

    async fn queue_depth(&self) -> Result<i64, StoreError>;
}

/// [`EventStore`] backed by SQLite.
pub struct SqliteEventStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    changes: broadcast::Sender<EventRecord>,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            clock,
            changes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn publish(&self, id: i64) -> Result<(), StoreError> {
        // Nobody listening is fine.
        if self.changes.receiver_count() == 0 {
            return Ok(());
        }
        if let Some(record) = queries::get_event(&self.pool, id).await? {
            let _ = self.changes.send(record);
        }
        Ok(())
    }

    async fn insert_with_job(
        &self,
        row: NewEventRow<'_>,
        job_type: JobType,
        payload: String,
    ) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let event_id = queries::insert_event(&mut *tx, &row).await?;
        queries::insert_job(&mut *tx, &job_type, &payload, now, Some(event_id)).await?;
        tx.commit().await?;

        tracing::debug!(event_id, job_type = %job_type, "Event and queue job persisted");
        self.publish(event_id).await?;
        Ok(event_id)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn record_scan(
        &self,
        scan: &NewScan,
        context: &CaptureContext,
    ) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&ScanPayload {
            barcode: scan.barcode.clone(),
            symbology: scan.symbology.clone(),
            order_id: context.order_id.clone(),
        })?;

        let row = NewEventRow {
            kind: EventKind::BarcodeScan,
            content: &scan.barcode,
            captured_at: self.clock.now(),
            order_id: context.order_id.as_deref(),
            image_path: None,
            image_size: None,
            image_id: None,
        };
        self.insert_with_job(row, JobType::Scan, payload).await
    }

    async fn record_image_upload(
        &self,
        upload: &NewImageUpload,
        context: &CaptureContext,
    ) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&ImageUploadPayload {
            image_path: upload.path.clone(),
            image_size: upload.size,
            image_id: upload.image_id.clone(),
            order_id: context.order_id.clone(),
        })?;

        let row = NewEventRow {
            kind: EventKind::ImageUpload,
            content: &upload.path,
            captured_at: self.clock.now(),
            order_id: context.order_id.as_deref(),
            image_path: Some(&upload.path),
            image_size: Some(upload.size),
            image_id: Some(&upload.image_id),
        };
        self.insert_with_job(row, JobType::ImageUpload, payload).await
    }

    async fn get_event(&self, id: i64) -> Result<Option<EventRecord>, StoreError> {
        Ok(queries::get_event(&self.pool, id).await?)
    }

    async fn update_status(
        &self,
        id: i64,
        status: EventStatus,
        checksum: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = queries::get_event(&mut *tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        if !current.status.can_transition_to(status) {
            tracing::debug!(
                event_id = id,
                from = %current.status,
                to = %status,
                "Ignoring backwards status transition"
            );
            return Ok(false);
        }

        queries::set_event_status(&mut *tx, id, status, checksum, self.clock.now()).await?;
        tx.commit().await?;

        self.publish(id).await?;
        Ok(true)
    }

    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(queries::list_events(&self.pool, DEFAULT_LIST_LIMIT).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.changes.subscribe()
    }

    async fn purge_older_than(&self, age: Duration) -> Result<u64, StoreError> {
        let cutoff = self.clock.now() - age;
        let purged = queries::purge_settled_before(&self.pool, cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Purged settled events");
        }
        Ok(purged)
    }

    async fn oldest_job(&self) -> Result<Option<QueueJob>, StoreError> {
        Ok(queries::oldest_job(&self.pool).await?)
    }

    async fn increment_retries(&self, job_id: i64) -> Result<i32, StoreError> {
        Ok(queries::increment_retries(&self.pool, job_id).await?)
    }

    async fn resolve_job(
        &self,
        job_id: i64,
        event_id: Option<i64>,
        status: EventStatus,
        checksum: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut changed = false;
        if let Some(event_id) = event_id {
            if let Some(current) = queries::get_event(&mut *tx, event_id).await? {
                if current.status.can_transition_to(status) {
                    queries::set_event_status(
                        &mut *tx,
                        event_id,
                        status,
                        checksum,
                        self.clock.now(),
                    )
                    .await?;
                    changed = true;
                } else {
                    tracing::debug!(
                        event_id,
                        from = %current.status,
                        to = %status,
                        "Event already settled, leaving status unchanged"
                    );
                }
            }
        }

        queries::delete_job(&mut *tx, job_id).await?;
        tx.commit().await?;

        if let (true, Some(event_id)) = (changed, event_id) {
            self.publish(event_id).await?;
        }
        Ok(())
    }

    async fn delete_job(&self, job_id: i64) -> Result<(), StoreError> {
        queries::delete_job(&self.pool, job_id).await?;
        Ok(())
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        Ok(queries::count_jobs(&self.pool).await?)
    }
}
