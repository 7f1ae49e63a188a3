use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of delivery work a queued job represents.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    Scan,
    ImageUpload,
    /// A job type written by a newer or older client build.
    #[strum(default)]
    Unknown(String),
}

/// A durable unit of delivery work, drained strictly by `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueJob {
    pub id: i64,
    pub job_type: JobType,
    /// Serialized JSON payload; shape depends on `job_type`.
    pub payload: String,
    pub retries: i32,
    pub created_at: DateTime<Utc>,
    pub event_id: Option<i64>,
}

/// Payload of a `Scan` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    pub barcode: String,
    #[serde(rename = "type")]
    pub symbology: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Payload of an `ImageUpload` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageUploadPayload {
    pub image_path: String,
    pub image_size: i64,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trips_through_column_text() {
        assert_eq!(JobType::Scan.to_string(), "scan");
        assert_eq!("image_upload".parse::<JobType>().unwrap(), JobType::ImageUpload);
        assert_eq!(
            "label_print".parse::<JobType>().unwrap(),
            JobType::Unknown("label_print".to_string())
        );
    }

    #[test]
    fn test_scan_payload_wire_shape() {
        let payload = ScanPayload {
            barcode: "4006381333931".to_string(),
            symbology: "ean_13".to_string(),
            order_id: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"barcode": "4006381333931", "type": "ean_13"}));
    }

    #[test]
    fn test_image_payload_accepts_order_id() {
        let json = r#"{"imagePath":"/data/img/1.jpg","imageSize":2048,"imageId":"abc","orderId":"SO-7"}"#;
        let payload: ImageUploadPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.order_id.as_deref(), Some("SO-7"));
        assert_eq!(payload.image_size, 2048);
    }
}
