use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Serialize;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::models::api::{MeshMessage, MeshMessageRequest};
use crate::models::relay::MeshNode;
use crate::services::encryption::EnvelopeCipher;
use crate::services::relay::RelayProtocolClient;

#[derive(Serialize)]
pub struct PushedMessage {
    pub packet_id: String,
}

fn relay(state: &AppState) -> Result<&Arc<RelayProtocolClient>, StatusCode> {
    state.relay.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

fn envelopes(state: &AppState) -> Result<&Arc<EnvelopeCipher>, StatusCode> {
    state.envelopes.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// GET /api/v1/mesh/status: peers registered with the relay.
pub async fn mesh_status(State(state): State<AppState>) -> Result<Json<Vec<MeshNode>>, StatusCode> {
    relay(&state)?
        .mesh_status()
        .await
        .map(Json)
        .map_err(|_| StatusCode::BAD_GATEWAY)
}

/// POST /api/v1/mesh/messages: seal a message and push it to a peer.
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<MeshMessageRequest>,
) -> Result<Json<PushedMessage>, StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let relay = relay(&state)?;
    let sealed = envelopes(&state)?
        .seal(request.message.as_bytes())
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to seal mesh message");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let packet_id = relay
        .push(
            &request.target_instance_id,
            &sealed.cipher,
            &sealed.nonce,
            request.ttl_seconds,
        )
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;

    Ok(Json(PushedMessage { packet_id }))
}

/// GET /api/v1/mesh/messages: pull and open everything queued for us.
///
/// Pulled packets are deleted by the relay, so messages that fail to open are
/// returned with `message: null` instead of being dropped silently.
pub async fn pull_messages(
    State(state): State<AppState>,
) -> Result<Json<Vec<MeshMessage>>, StatusCode> {
    let relay = relay(&state)?;
    let cipher = envelopes(&state)?;
    let envelopes = relay.pull().await.map_err(|_| StatusCode::BAD_GATEWAY)?;

    let messages = envelopes
        .into_iter()
        .map(|envelope| {
            let message = match cipher.open(&envelope.payload_cipher, &envelope.nonce) {
                Ok(plain) => String::from_utf8(plain).ok(),
                Err(e) => {
                    tracing::warn!(packet_id = %envelope.id, error = %e, "Could not open mesh envelope");
                    None
                }
            };
            MeshMessage {
                id: envelope.id,
                sender_instance_id: envelope.sender_instance_id,
                message,
                created_at: envelope.created_at,
            }
        })
        .collect();

    Ok(Json(messages))
}
