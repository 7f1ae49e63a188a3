use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What was captured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    BarcodeScan,
    ImageUpload,
}

/// Delivery status of a captured event.
///
/// `Buffered` means the backend accepted the scan into its ingest buffer;
/// `Confirmed` means the artifact is durably stored server-side. `Failed` is
/// terminal and never left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Buffered,
    Confirmed,
    Failed,
}

impl EventStatus {
    /// Whether moving from `self` to `next` keeps the status monotone.
    ///
    /// Re-applying the current status is allowed so that two racing success
    /// paths can both report without an error.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, _) => true,
            (Buffered, Confirmed) => true,
            _ => false,
        }
    }
}

/// A captured event as persisted in the local store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    pub kind: EventKind,
    /// Barcode text for scans, image path for uploads.
    pub content: String,
    pub captured_at: DateTime<Utc>,
    pub status: EventStatus,
    pub checksum: Option<String>,
    pub order_id: Option<String>,
    pub image_path: Option<String>,
    pub image_size: Option<i64>,
    pub image_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Order/context the operator was working in when the capture happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureContext {
    pub order_id: Option<String>,
}

impl CaptureContext {
    pub fn for_order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
        }
    }
}

/// A decoded barcode handed over by the scanner collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewScan {
    pub barcode: String,
    /// Symbology reported by the decoder (e.g. "ean_13", "qr_code").
    pub symbology: String,
}

/// An image written to local storage by the camera collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewImageUpload {
    pub path: String,
    pub size: i64,
    /// Caller-generated idempotency key carried to the backend.
    pub image_id: String,
}
