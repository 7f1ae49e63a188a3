//! Shared setup for integration tests: a temp-file event store and
//! scriptable doubles for both delivery paths.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use scan_relay_client::{
    db,
    models::job::ScanPayload,
    models::message::{DeliveryPath, Receipt, ScanMessage, SendOutcome},
    services::{
        clock::ManualClock,
        event_store::SqliteEventStore,
        hedged::ScanSender,
        transport::{ReliableSender, TransportError, TransportResult},
        upload::{ImageUploadRequest, ImageUploader},
    },
};

pub struct TestStore {
    pub store: Arc<SqliteEventStore>,
    pub clock: Arc<ManualClock>,
    // Keeps the database file alive for the test.
    pub _dir: TempDir,
}

pub async fn open_store() -> TestStore {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("client.db").display());
    let pool = db::init_pool(&url).await.expect("open sqlite");
    db::run_migrations(&pool).await.expect("migrate");

    let clock = Arc::new(ManualClock::new(start_time()));
    TestStore {
        store: Arc::new(SqliteEventStore::with_clock(pool, clock.clone())),
        clock,
        _dir: dir,
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
}

/// Scan sender that fails according to a script, then succeeds.
#[derive(Default)]
pub struct ScriptedScanSender {
    failures: Mutex<VecDeque<bool>>,
    always_fail: bool,
    sent: Mutex<Vec<String>>,
}

impl ScriptedScanSender {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Self::default()
        })
    }

    /// `true` entries fail the matching attempt.
    pub fn scripted(script: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(script.iter().copied().collect()),
            ..Self::default()
        })
    }

    /// Barcodes in the order they were attempted.
    pub fn attempts(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ScanSender for ScriptedScanSender {
    async fn send(
        &self,
        scan: &ScanPayload,
        _captured_at: DateTime<Utc>,
    ) -> TransportResult<SendOutcome> {
        self.sent.lock().push(scan.barcode.clone());
        let fail = self.always_fail || self.failures.lock().pop_front().unwrap_or(false);
        if fail {
            return Err(TransportError::Timeout);
        }
        Ok(SendOutcome {
            msg_id: Uuid::new_v4(),
            path: DeliveryPath::Fallback,
            checksum: Some(format!("sha256:{}", scan.barcode)),
        })
    }
}

/// Image uploader recording every request it receives.
#[derive(Default)]
pub struct RecordingUploader {
    pub uploads: Mutex<Vec<ImageUploadRequest>>,
}

impl RecordingUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl ImageUploader for RecordingUploader {
    async fn upload(&self, request: ImageUploadRequest) -> TransportResult<Receipt> {
        let checksum = format!("img:{}", request.image_id);
        self.uploads.lock().push(request);
        Ok(Receipt {
            checksum: Some(checksum),
        })
    }
}

/// Reliable path double that records submitted messages.
#[derive(Default)]
pub struct RecordingReliable {
    pub messages: Mutex<Vec<ScanMessage>>,
}

#[async_trait]
impl ReliableSender for RecordingReliable {
    async fn submit_scan(&self, message: &ScanMessage) -> TransportResult<Receipt> {
        self.messages.lock().push(message.clone());
        Ok(Receipt::default())
    }
}
