use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub persistent_channel: ComponentHealth,
    pub network_online: bool,
    pub queue_depth: Option<i64>,
    pub pending_acks: usize,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health: local store health plus delivery path status.
///
/// Only the store decides the HTTP status; an offline network or a closed
/// channel is normal for this client and reported as data.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let db_check = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Event store health check failed");
            ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
    };

    let channel_check = ComponentHealth {
        status: if state.transport.is_channel_open() {
            "open".to_string()
        } else {
            "closed".to_string()
        },
        latency_ms: None,
    };

    let healthy = db_check.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            persistent_channel: channel_check,
            network_online: state.network.is_online(),
            queue_depth: state.store.queue_depth().await.ok(),
            pending_acks: state.transport.pending_acks(),
        },
    };

    (status_code, Json(response))
}
