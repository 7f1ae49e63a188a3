use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::event::EventStatus;

/// Request to record a decoded barcode.
#[derive(Debug, Deserialize, Validate)]
pub struct ScanRequest {
    #[garde(length(min = 1, max = 4096))]
    pub barcode: String,

    #[serde(rename = "type")]
    #[garde(length(min = 1, max = 64))]
    pub symbology: String,

    #[garde(length(min = 1, max = 200))]
    pub order_id: Option<String>,
}

/// Request to queue an image already written to local storage.
#[derive(Debug, Deserialize, Validate)]
pub struct ImageRequest {
    #[garde(length(min = 1, max = 1024))]
    pub image_path: String,

    #[garde(range(min = 0))]
    pub image_size: i64,

    /// Idempotency key; generated when the caller omits it.
    #[garde(length(min = 1, max = 128))]
    pub image_id: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub order_id: Option<String>,
}

/// Response after a capture is persisted and queued.
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub event_id: i64,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

/// Request to send a sealed message to a mesh peer.
#[derive(Debug, Deserialize, Validate)]
pub struct MeshMessageRequest {
    #[garde(length(min = 1, max = 128))]
    pub target_instance_id: String,

    #[garde(length(min = 1, max = 65536))]
    pub message: String,

    #[garde(skip)]
    pub ttl_seconds: Option<u64>,
}

/// A pulled mesh message, opened with the local relay key.
#[derive(Debug, Serialize)]
pub struct MeshMessage {
    pub id: String,
    pub sender_instance_id: String,
    pub message: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_request_rejects_empty_barcode() {
        let request: ScanRequest =
            serde_json::from_str(r#"{"barcode":"","type":"qr_code"}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_image_request_accepts_missing_image_id() {
        let request: ImageRequest =
            serde_json::from_str(r#"{"image_path":"/tmp/a.jpg","image_size":10}"#).unwrap();
        assert!(request.validate().is_ok());
        assert!(request.image_id.is_none());
    }
}
