//! Queue worker: drains the durable job queue oldest-first.
//!
//! One step is Fetch -> Dispatch -> {Success, Retry, PermanentFail}:
//! - success resolves the event (buffered/confirmed) and deletes the job
//! - transient failures bump `retries`; reaching the cap fails the event
//! - permanent failures (bad payload, missing or undecodable image) fail the
//!   event at once without touching the retry budget
//!
//! A job left for retry stays at the head of the queue, so a drain stops
//! there rather than letting newer jobs overtake it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::models::event::EventStatus;
use crate::models::job::{ImageUploadPayload, JobType, QueueJob, ScanPayload};
use crate::services::event_store::{EventStore, StoreError};
use crate::services::hedged::ScanSender;
use crate::services::upload::{load_verified_image, ImageUploadRequest, ImageUploader};

/// Why a dispatch did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    /// Network trouble; worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Bad local data; retrying cannot help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The local store failed; the whole run is retried, not this job.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    Delivered {
        status: EventStatus,
        checksum: Option<String>,
    },
    /// Someone else already delivered it.
    AlreadyConfirmed,
    /// Job type this build does not understand.
    Unrecognized,
}

/// What happened to the job handled in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    /// Dropped without sending (already confirmed elsewhere, or unknown type).
    Skipped,
    /// Left queued; `retries` is the new counter value.
    Retry { retries: i32 },
    /// Event marked failed and job removed.
    Failed,
}

/// Result of a single worker step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkStep {
    /// Queue was empty.
    Idle,
    Processed { job_id: i64, outcome: JobOutcome },
}

/// Summary of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Set when the run should be attempted again after this delay.
    pub retry_after: Option<Duration>,
    pub cancelled: bool,
}

impl DrainReport {
    /// Whether work was left behind that another run should pick up.
    pub fn needs_rerun(&self) -> bool {
        self.retry_after.is_some() || self.cancelled
    }
}

/// A single drain run, as seen by the scheduler.
#[async_trait]
pub trait DrainQueue: Send + Sync {
    async fn drain(&self, cancel: &CancellationToken) -> DrainReport;
}

pub struct QueueWorker {
    store: Arc<dyn EventStore>,
    scans: Arc<dyn ScanSender>,
    images: Arc<dyn ImageUploader>,
    config: QueueConfig,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn EventStore>,
        scans: Arc<dyn ScanSender>,
        images: Arc<dyn ImageUploader>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            scans,
            images,
            config,
        }
    }

    /// Handle the oldest job, if any.
    pub async fn run_once(&self) -> Result<WorkStep, StoreError> {
        let Some(job) = self.store.oldest_job().await? else {
            return Ok(WorkStep::Idle);
        };

        tracing::info!(
            job_id = job.id,
            event_id = job.event_id,
            job_type = %job.job_type,
            retries = job.retries,
            "Processing queue job"
        );

        let outcome = match self.dispatch(&job).await {
            Ok(Delivery::Delivered { status, checksum }) => {
                self.store
                    .resolve_job(job.id, job.event_id, status, checksum.as_deref())
                    .await?;
                metrics::counter!("queue_jobs_completed_total").increment(1);
                tracing::info!(job_id = job.id, status = %status, "Job delivered");
                JobOutcome::Delivered
            }
            Ok(Delivery::AlreadyConfirmed) => {
                self.store.delete_job(job.id).await?;
                tracing::info!(job_id = job.id, "Event already confirmed, dropping job");
                JobOutcome::Skipped
            }
            Ok(Delivery::Unrecognized) => {
                self.store.delete_job(job.id).await?;
                tracing::warn!(job_id = job.id, job_type = %job.job_type, "Dropping job of unknown type");
                JobOutcome::Skipped
            }
            Err(JobFailure::Permanent(reason)) => {
                self.fail(&job).await?;
                tracing::warn!(job_id = job.id, reason = %reason, "Job failed permanently");
                JobOutcome::Failed
            }
            Err(JobFailure::Transient(reason)) => self.retry_or_fail(&job, &reason).await?,
            Err(JobFailure::Store(e)) => return Err(e),
        };

        Ok(WorkStep::Processed {
            job_id: job.id,
            outcome,
        })
    }

    async fn fail(&self, job: &QueueJob) -> Result<(), StoreError> {
        self.store
            .resolve_job(job.id, job.event_id, EventStatus::Failed, None)
            .await?;
        metrics::counter!("queue_jobs_failed_total").increment(1);
        Ok(())
    }

    async fn retry_or_fail(&self, job: &QueueJob, reason: &str) -> Result<JobOutcome, StoreError> {
        let retries = self.store.increment_retries(job.id).await?;
        metrics::counter!("queue_job_retries_total").increment(1);

        if retries >= self.config.max_retries {
            self.fail(job).await?;
            tracing::warn!(
                job_id = job.id,
                retries,
                reason,
                "Job failed after max retries"
            );
            return Ok(JobOutcome::Failed);
        }

        tracing::info!(job_id = job.id, retries, reason, "Job left queued for retry");
        Ok(JobOutcome::Retry { retries })
    }

    async fn dispatch(&self, job: &QueueJob) -> Result<Delivery, JobFailure> {
        match &job.job_type {
            JobType::Scan => self.send_scan(job).await,
            JobType::ImageUpload => self.upload_image(job).await,
            JobType::Unknown(_) => Ok(Delivery::Unrecognized),
        }
    }

    async fn send_scan(&self, job: &QueueJob) -> Result<Delivery, JobFailure> {
        let payload: ScanPayload = serde_json::from_str(&job.payload)
            .map_err(|e| JobFailure::Permanent(format!("malformed scan payload: {e}")))?;

        let outcome = self
            .scans
            .send(&payload, job.created_at)
            .await
            .map_err(|e| JobFailure::Transient(e.to_string()))?;

        tracing::debug!(job_id = job.id, msg_id = %outcome.msg_id, path = outcome.path.as_str(), "Scan sent");
        Ok(Delivery::Delivered {
            status: EventStatus::Buffered,
            checksum: outcome.checksum,
        })
    }

    async fn upload_image(&self, job: &QueueJob) -> Result<Delivery, JobFailure> {
        let payload: ImageUploadPayload = serde_json::from_str(&job.payload)
            .map_err(|e| JobFailure::Permanent(format!("malformed image payload: {e}")))?;

        if let Some(event_id) = job.event_id {
            let event = self.store.get_event(event_id).await?;
            if event.is_some_and(|event| event.status == EventStatus::Confirmed) {
                return Ok(Delivery::AlreadyConfirmed);
            }
        }

        let bytes = load_verified_image(&payload.image_path)
            .await
            .map_err(|e| JobFailure::Permanent(e.to_string()))?;

        let request = ImageUploadRequest::new(
            &payload.image_id,
            payload.order_id.as_deref(),
            &payload.image_path,
            bytes,
        );
        let receipt = self
            .images
            .upload(request)
            .await
            .map_err(|e| JobFailure::Transient(e.to_string()))?;

        Ok(Delivery::Delivered {
            status: EventStatus::Confirmed,
            checksum: receipt.checksum,
        })
    }
}

#[async_trait]
impl DrainQueue for QueueWorker {
    async fn drain(&self, cancel: &CancellationToken) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if let Some(max) = self.config.max_jobs_per_run {
                if report.processed >= max {
                    break;
                }
            }

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                step = self.run_once() => step,
            };

            match step {
                Ok(WorkStep::Idle) => break,
                Ok(WorkStep::Processed { outcome, .. }) => {
                    report.processed += 1;
                    match outcome {
                        JobOutcome::Delivered | JobOutcome::Skipped => report.delivered += 1,
                        JobOutcome::Failed => report.failed += 1,
                        JobOutcome::Retry { retries } => {
                            report.retry_after = Some(self.config.backoff_for(retries));
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue drain aborted, will retry later");
                    report.retry_after = Some(self.config.backoff_base);
                    break;
                }
            }
        }

        if let Ok(depth) = self.store.queue_depth().await {
            metrics::gauge!("queue_depth").set(depth as f64);
        }
        tracing::info!(
            processed = report.processed,
            delivered = report.delivered,
            failed = report.failed,
            retry_after_ms = report.retry_after.map(|d| d.as_millis() as u64),
            cancelled = report.cancelled,
            "Queue drain finished"
        );
        report
    }
}
