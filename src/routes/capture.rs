use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{CaptureResponse, ImageRequest, ScanRequest};
use crate::models::event::{CaptureContext, EventRecord, EventStatus, NewImageUpload, NewScan};
use crate::services::upload::DirectUploadError;

/// POST /api/v1/scans: record a decoded barcode and queue its delivery.
pub async fn submit_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<(StatusCode, Json<CaptureResponse>), StatusCode> {
    request.validate().map_err(|e| {
        tracing::debug!(error = %e, "Rejected scan request");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let scan = NewScan {
        barcode: request.barcode,
        symbology: request.symbology,
    };
    let context = CaptureContext {
        order_id: request.order_id,
    };

    let event_id = state
        .capture
        .capture_scan(&scan, &context)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to persist scan");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CaptureResponse {
            event_id,
            status: EventStatus::Pending,
            image_id: None,
        }),
    ))
}

/// POST /api/v1/images: queue an image that is already on local storage.
pub async fn submit_image(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Result<(StatusCode, Json<CaptureResponse>), StatusCode> {
    request.validate().map_err(|e| {
        tracing::debug!(error = %e, "Rejected image request");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let upload = NewImageUpload {
        path: request.image_path,
        size: request.image_size,
        image_id: request
            .image_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    };
    let context = CaptureContext {
        order_id: request.order_id,
    };

    let event_id = state
        .capture
        .capture_image(&upload, &context)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to persist image capture");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CaptureResponse {
            event_id,
            status: EventStatus::Pending,
            image_id: Some(upload.image_id),
        }),
    ))
}

/// POST /api/v1/images/{id}/upload: upload now instead of waiting for the queue.
pub async fn upload_image_now(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> Result<Json<EventRecord>, StatusCode> {
    match state.direct.upload_now(event_id).await {
        Ok(record) => Ok(Json(record)),
        Err(DirectUploadError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(DirectUploadError::NotAnImage(_)) | Err(DirectUploadError::Image(_)) => {
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }
        Err(DirectUploadError::AlreadyFailed(_)) => Err(StatusCode::CONFLICT),
        Err(DirectUploadError::Transport(e)) => {
            tracing::warn!(event_id, error = %e, "Direct upload failed, queue will retry");
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(DirectUploadError::Store(e)) => {
            tracing::error!(event_id, error = %e, "Direct upload store error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
