//! Image uploads: local file verification, the HTTP uploader, and the
//! foreground "direct upload" path that races the queue worker.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;

use crate::models::event::{EventKind, EventRecord, EventStatus};
use crate::models::message::Receipt;
use crate::services::event_store::{EventStore, StoreError};
use crate::services::transport::{TransportError, TransportResult};

/// Local image problems. Retrying cannot fix these.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image file {path} is not readable: {source}")]
    Missing {
        path: String,
        source: std::io::Error,
    },

    #[error("image file {path} could not be decoded: {reason}")]
    Undecodable { path: String, reason: String },
}

/// Read `path` and make sure it decodes as an image. The decoded pixels are
/// released before returning; only the original file bytes are kept.
pub async fn load_verified_image(path: &str) -> Result<Vec<u8>, ImageError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ImageError::Missing {
        path: path.to_string(),
        source,
    })?;

    let decoded = tokio::task::spawn_blocking(move || {
        let result = image::load_from_memory(&bytes).map(|img| (img.width(), img.height()));
        (bytes, result)
    })
    .await
    .map_err(|e| ImageError::Undecodable {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    match decoded {
        (bytes, Ok((width, height))) => {
            tracing::debug!(path, width, height, "Image verified");
            Ok(bytes)
        }
        (_, Err(e)) => Err(ImageError::Undecodable {
            path: path.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// One image to send to the backend.
#[derive(Debug, Clone)]
pub struct ImageUploadRequest {
    /// Idempotency key assigned at capture time.
    pub image_id: String,
    pub order_id: Option<String>,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageUploadRequest {
    pub fn new(image_id: &str, order_id: Option<&str>, path: &str, bytes: Vec<u8>) -> Self {
        let file_name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image")
            .to_string();
        Self {
            image_id: image_id.to_string(),
            order_id: order_id.map(str::to_string),
            file_name,
            bytes,
        }
    }
}

/// Delivers image bytes; the backend collapses uploads sharing an `image_id`.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, request: ImageUploadRequest) -> TransportResult<Receipt>;
}

/// [`ImageUploader`] posting a multipart form to the backend.
pub struct HttpImageUploader {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpImageUploader {
    pub fn new(http: Client, base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl ImageUploader for HttpImageUploader {
    async fn upload(&self, request: ImageUploadRequest) -> TransportResult<Receipt> {
        let mime = image::guess_format(&request.bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        let part = Part::bytes(request.bytes)
            .file_name(request.file_name)
            .mime_str(mime)?;

        let mut form = Form::new()
            .part("image", part)
            .text("image_id", request.image_id.clone());
        if let Some(order_id) = request.order_id {
            form = form.text("order_id", order_id);
        }

        let mut builder = self
            .http
            .post(format!("{}/api/v1/images", self.base_url))
            .header("Idempotency-Key", &request.image_id)
            .multipart(form);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Receipt::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectUploadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Event {0} not found")]
    NotFound(i64),

    #[error("Event {0} is not an image upload")]
    NotAnImage(i64),

    #[error("Event {0} has already failed")]
    AlreadyFailed(i64),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Upload failed: {0}")]
    Transport(#[from] TransportError),
}

/// Uploads an image right away instead of waiting for the queue.
///
/// The queued job is left in place; when the worker reaches it, it sees the
/// record is already confirmed and drops the job without uploading again.
pub struct DirectUploader {
    store: Arc<dyn EventStore>,
    uploader: Arc<dyn ImageUploader>,
}

impl DirectUploader {
    pub fn new(store: Arc<dyn EventStore>, uploader: Arc<dyn ImageUploader>) -> Self {
        Self { store, uploader }
    }

    pub async fn upload_now(&self, event_id: i64) -> Result<EventRecord, DirectUploadError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(DirectUploadError::NotFound(event_id))?;

        if event.kind != EventKind::ImageUpload {
            return Err(DirectUploadError::NotAnImage(event_id));
        }
        match event.status {
            EventStatus::Confirmed => return Ok(event),
            EventStatus::Failed => return Err(DirectUploadError::AlreadyFailed(event_id)),
            EventStatus::Pending | EventStatus::Buffered => {}
        }

        let (Some(path), Some(image_id)) = (event.image_path.as_deref(), event.image_id.as_deref())
        else {
            return Err(DirectUploadError::NotAnImage(event_id));
        };

        let bytes = load_verified_image(path).await?;
        let request = ImageUploadRequest::new(image_id, event.order_id.as_deref(), path, bytes);
        let receipt = self.uploader.upload(request).await?;

        self.store
            .update_status(event_id, EventStatus::Confirmed, receipt.checksum.as_deref())
            .await?;
        tracing::info!(event_id, image_id, "Image uploaded directly");

        self.store
            .get_event(event_id)
            .await?
            .ok_or(DirectUploadError::NotFound(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let err = load_verified_image("/definitely/not/here.jpg").await.unwrap_err();
        assert!(matches!(err, ImageError::Missing { .. }));
    }

    #[tokio::test]
    async fn test_garbage_file_is_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"this is not a jpeg").unwrap();

        let err = load_verified_image(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ImageError::Undecodable { .. }));
    }

    #[tokio::test]
    async fn test_valid_png_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        image::RgbImage::new(2, 2).save(&path).unwrap();
        let on_disk = std::fs::read(&path).unwrap();

        let bytes = load_verified_image(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, on_disk);
    }

    #[test]
    fn test_request_uses_file_name() {
        let request = ImageUploadRequest::new("img-1", None, "/data/captures/shelf.jpg", vec![]);
        assert_eq!(request.file_name, "shelf.jpg");
    }
}
