use serde::{Deserialize, Serialize};

/// `POST /register` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub instance_id: String,
    pub mesh_id: String,
    pub external_ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `POST /register` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub ok: bool,
    pub instance_id: String,
    pub mesh_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// `POST /push` body. Cipher and nonce travel base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub mesh_id: String,
    pub target_instance_id: String,
    pub sender_instance_id: String,
    pub payload_cipher: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub packet_id: String,
}

/// A packet as the relay stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPacket {
    pub id: String,
    pub mesh_id: String,
    pub target_instance_id: String,
    pub sender_instance_id: String,
    pub payload_cipher: String,
    pub nonce: String,
    pub created_at: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub packets: Vec<RelayPacket>,
}

/// A pulled packet with its opaque payload decoded to bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub id: String,
    pub mesh_id: String,
    pub sender_instance_id: String,
    pub target_instance_id: String,
    pub payload_cipher: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: String,
    pub ttl: Option<u64>,
}

/// A peer registered in the mesh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshNode {
    pub instance_id: String,
    pub external_ip: String,
    pub port: u16,
    #[serde(default)]
    pub status: Option<String>,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshStatusResponse {
    #[serde(default)]
    pub nodes: Vec<MeshNode>,
}
