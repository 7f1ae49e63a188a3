use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod capture;
pub mod events;
pub mod health;
pub mod mesh;
pub mod metrics;

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Local API served to the UI layer.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/scans", post(capture::submit_scan))
        .route("/api/v1/images", post(capture::submit_image))
        .route("/api/v1/images/{id}/upload", post(capture::upload_image_now))
        .route("/api/v1/events", get(events::list_events))
        .route("/api/v1/events/{id}", get(events::get_event))
        .route("/api/v1/queue/drain", post(events::drain_queue))
        .route("/api/v1/mesh/status", get(mesh::mesh_status))
        .route(
            "/api/v1/mesh/messages",
            get(mesh::pull_messages).post(mesh::send_message),
        )
        .with_state(state.clone())
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state((state, prometheus)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
