use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::event::EventRecord;

/// GET /api/v1/events: most recent captures and their delivery status.
pub async fn list_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<EventRecord>>, StatusCode> {
    state.store.list_events().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to list events");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/v1/events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> Result<Json<EventRecord>, StatusCode> {
    match state.store.get_event(event_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(event_id, error = %e, "Failed to load event");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/queue/drain: ask for a drain run now.
pub async fn drain_queue(State(state): State<AppState>) -> StatusCode {
    state.scheduler.schedule();
    StatusCode::ACCEPTED
}
