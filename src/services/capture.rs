use std::sync::Arc;

use crate::models::event::{CaptureContext, NewImageUpload, NewScan};
use crate::services::event_store::{EventStore, StoreError};
use crate::services::scheduler::QueueScheduler;

/// Entry point for capture events coming from the scanner and camera.
///
/// The event and its job are committed before the drain is requested, so the
/// worker can never run ahead of the write it is meant to deliver.
#[derive(Clone)]
pub struct CaptureService {
    store: Arc<dyn EventStore>,
    scheduler: QueueScheduler,
}

impl CaptureService {
    pub fn new(store: Arc<dyn EventStore>, scheduler: QueueScheduler) -> Self {
        Self { store, scheduler }
    }

    pub async fn capture_scan(
        &self,
        scan: &NewScan,
        context: &CaptureContext,
    ) -> Result<i64, StoreError> {
        let event_id = self.store.record_scan(scan, context).await?;
        metrics::counter!("capture_events_total", "kind" => "barcode_scan").increment(1);
        tracing::info!(event_id, symbology = %scan.symbology, "Scan captured");

        self.scheduler.schedule();
        Ok(event_id)
    }

    pub async fn capture_image(
        &self,
        upload: &NewImageUpload,
        context: &CaptureContext,
    ) -> Result<i64, StoreError> {
        let event_id = self.store.record_image_upload(upload, context).await?;
        metrics::counter!("capture_events_total", "kind" => "image_upload").increment(1);
        tracing::info!(event_id, image_id = %upload.image_id, size = upload.size, "Image captured");

        self.scheduler.schedule();
        Ok(event_id)
    }
}
