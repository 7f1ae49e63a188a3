use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scan as sent to the backend over either delivery path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanMessage {
    pub msg_id: Uuid,
    pub barcode: String,
    #[serde(rename = "type")]
    pub symbology: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Capture time, unix milliseconds.
    pub timestamp: i64,
}

/// Frame the backend pushes back over the persistent channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckFrame {
    pub ack: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Body returned by the reliable request/response endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Which path delivered a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPath {
    FastPath,
    Fallback,
}

impl DeliveryPath {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryPath::FastPath => "fast",
            DeliveryPath::Fallback => "fallback",
        }
    }
}

/// Successful result of a hedged send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub msg_id: Uuid,
    pub path: DeliveryPath,
    pub checksum: Option<String>,
}
