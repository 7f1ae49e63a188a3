//! Client for the blind mesh relay.
//!
//! The relay only routes opaque envelopes between instances of one mesh; it
//! never sees plaintext. Calls are single bounded round trips with no retry:
//! callers decide whether and when to try again.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::RelayConfig;
use crate::models::relay::{
    Envelope, MeshNode, MeshStatusResponse, PullResponse, PushRequest, PushResponse,
    RegisterRequest, Registration, RelayPacket,
};
use crate::services::transport::build_http_client;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relay returned HTTP {0}")]
    Status(StatusCode),

    #[error("Relay packet {packet_id} has invalid base64 in {field}")]
    Decode {
        packet_id: String,
        field: &'static str,
    },
}

pub type RelayResult<T> = Result<T, RelayError>;

pub struct RelayProtocolClient {
    http: Client,
    base_url: String,
    mesh_id: String,
    instance_id: String,
}

impl RelayProtocolClient {
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let http = build_http_client(config.connect_timeout, config.read_timeout)?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: &RelayConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mesh_id: config.mesh_id.clone(),
            instance_id: config.instance_id.clone(),
        }
    }

    /// Register or refresh this instance's presence for peer discovery.
    pub async fn heartbeat(
        &self,
        external_ip: &str,
        port: u16,
        status: Option<&str>,
    ) -> RelayResult<Registration> {
        let body = RegisterRequest {
            instance_id: self.instance_id.clone(),
            mesh_id: self.mesh_id.clone(),
            external_ip: external_ip.to_string(),
            port,
            status: status.map(str::to_string),
        };
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(&body)
            .send()
            .await;
        self.finish("register", response).await
    }

    /// Queue an opaque envelope for `target_instance_id`; returns the packet id.
    pub async fn push(
        &self,
        target_instance_id: &str,
        payload_cipher: &[u8],
        nonce: &[u8],
        ttl_seconds: Option<u64>,
    ) -> RelayResult<String> {
        let body = PushRequest {
            mesh_id: self.mesh_id.clone(),
            target_instance_id: target_instance_id.to_string(),
            sender_instance_id: self.instance_id.clone(),
            payload_cipher: B64.encode(payload_cipher),
            nonce: B64.encode(nonce),
            ttl_seconds,
        };
        let response = self
            .http
            .post(format!("{}/push", self.base_url))
            .json(&body)
            .send()
            .await;
        let pushed: PushResponse = self.finish("push", response).await?;
        Ok(pushed.packet_id)
    }

    /// Fetch every envelope queued for this instance. The relay deletes them
    /// as part of this call, so they are gone even if processing fails later.
    /// Packets that fail to decode are logged, counted and skipped; the rest
    /// of the batch is still returned.
    pub async fn pull(&self) -> RelayResult<Vec<Envelope>> {
        let response = self
            .http
            .get(format!(
                "{}/pull/{}/{}",
                self.base_url, self.mesh_id, self.instance_id
            ))
            .send()
            .await;
        let pulled: PullResponse = self.finish("pull", response).await?;
        Ok(self.decode_batch(pulled.packets))
    }

    fn decode_batch(&self, packets: Vec<RelayPacket>) -> Vec<Envelope> {
        packets
            .into_iter()
            .filter_map(|packet| match decode_packet(packet) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    metrics::counter!("relay_calls_failed_total", "op" => "decode").increment(1);
                    tracing::warn!(mesh_id = %self.mesh_id, error = %e, "Dropping undecodable relay packet");
                    None
                }
            })
            .collect()
    }

    /// List the registered peers of this mesh.
    pub async fn mesh_status(&self) -> RelayResult<Vec<MeshNode>> {
        let response = self
            .http
            .get(format!("{}/mesh/{}/status", self.base_url, self.mesh_id))
            .send()
            .await;
        let status: MeshStatusResponse = self.finish("mesh_status", response).await?;
        Ok(status.nodes)
    }

    async fn finish<T: DeserializeOwned>(
        &self,
        op: &'static str,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> RelayResult<T> {
        let result = match response {
            Ok(response) if response.status().is_success() => {
                response.json::<T>().await.map_err(RelayError::Http)
            }
            Ok(response) => Err(RelayError::Status(response.status())),
            Err(e) => Err(RelayError::Http(e)),
        };
        if let Err(e) = &result {
            metrics::counter!("relay_calls_failed_total", "op" => op).increment(1);
            tracing::warn!(op, mesh_id = %self.mesh_id, error = %e, "Relay call failed");
        }
        result
    }
}

fn decode_packet(packet: RelayPacket) -> RelayResult<Envelope> {
    let payload_cipher = B64.decode(&packet.payload_cipher).map_err(|_| RelayError::Decode {
        packet_id: packet.id.clone(),
        field: "payload_cipher",
    })?;
    let nonce = B64.decode(&packet.nonce).map_err(|_| RelayError::Decode {
        packet_id: packet.id.clone(),
        field: "nonce",
    })?;

    Ok(Envelope {
        id: packet.id,
        mesh_id: packet.mesh_id,
        sender_instance_id: packet.sender_instance_id,
        target_instance_id: packet.target_instance_id,
        payload_cipher,
        nonce,
        created_at: packet.created_at,
        ttl: packet.ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(cipher: &str) -> RelayPacket {
        RelayPacket {
            id: format!("p-{cipher}"),
            mesh_id: "m".to_string(),
            target_instance_id: "b".to_string(),
            sender_instance_id: "a".to_string(),
            payload_cipher: cipher.to_string(),
            nonce: B64.encode([9u8; 12]),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            ttl: Some(60),
        }
    }

    #[test]
    fn test_decode_packet_restores_bytes() {
        let envelope = decode_packet(packet(&B64.encode([0u8, 255, 1]))).unwrap();
        assert_eq!(envelope.payload_cipher, vec![0u8, 255, 1]);
        assert_eq!(envelope.nonce, vec![9u8; 12]);
    }

    #[test]
    fn test_decode_packet_rejects_bad_base64() {
        let err = decode_packet(packet("not base64!")).unwrap_err();
        assert!(matches!(err, RelayError::Decode { field: "payload_cipher", .. }));
    }

    #[test]
    fn test_bad_packet_does_not_sink_the_batch() {
        let client = RelayProtocolClient::with_client(
            Client::new(),
            &RelayConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                mesh_id: "m".to_string(),
                instance_id: "b".to_string(),
                connect_timeout: std::time::Duration::from_secs(1),
                read_timeout: std::time::Duration::from_secs(1),
            },
        );
        let good = B64.encode(b"sealed");
        let envelopes = client.decode_batch(vec![
            packet(&good),
            packet("!!notb64"),
            packet(&B64.encode(b"also sealed")),
        ]);

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].payload_cipher, b"sealed");
        assert_eq!(envelopes[1].payload_cipher, b"also sealed");
    }
}
