//! Network paths used by the hedged scan client.
//!
//! The persistent channel is exposed as a pair of text-frame channels so the
//! hedged client only ever deals with message passing:
//! - [`WebSocketConnector`] for production (tokio-tungstenite)
//! - test connectors that hand back in-memory channels
//!
//! The reliable path is a plain request/response call behind [`ReliableSender`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::models::message::{Receipt, ScanMessage};

/// Frames buffered per direction on the persistent channel.
const CHANNEL_BUFFER: usize = 64;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("request timed out")]
    Timeout,

    #[error("server returned HTTP {0}")]
    Status(StatusCode),

    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Http(e)
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// An open persistent channel: frames to send and frames received.
///
/// The channel is closed once `inbound` yields `None` or `outbound` reports
/// closed.
#[derive(Debug)]
pub struct ChannelHalves {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens the low-latency persistent channel.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> TransportResult<ChannelHalves>;
}

/// Persistent channel over a WebSocket.
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self) -> TransportResult<ChannelHalves> {
        let (ws_stream, _) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(&self.url))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);

        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(url = %url, error = %e, "Persistent channel write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let url = self.url.clone();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "Persistent channel read failed");
                        break;
                    }
                }
            }
            tracing::info!(url = %url, "Persistent channel closed");
        });

        tracing::info!(url = %self.url, "Persistent channel connected");
        Ok(ChannelHalves {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// The guaranteed request/response path for scans.
#[async_trait]
pub trait ReliableSender: Send + Sync {
    /// Deliver a scan; the server deduplicates on `message.msg_id`.
    async fn submit_scan(&self, message: &ScanMessage) -> TransportResult<Receipt>;
}

/// Build an HTTP client with bounded connect and overall request timeouts.
pub fn build_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(connect_timeout + read_timeout)
        .user_agent(concat!("scan-relay-client/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// [`ReliableSender`] posting JSON to the backend.
pub struct HttpFallback {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpFallback {
    pub fn new(http: Client, base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl ReliableSender for HttpFallback {
    async fn submit_scan(&self, message: &ScanMessage) -> TransportResult<Receipt> {
        let url = format!("{}/api/v1/scans", self.base_url);

        let mut request = self
            .http
            .post(&url)
            .header("Idempotency-Key", message.msg_id.to_string())
            .json(message);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        // Some deployments answer 202 with an empty body.
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Receipt::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_websocket_connector_round_trips_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let reply = format!("echo:{}", text.as_str());
                ws.send(Message::Text(reply.into())).await.unwrap();
            }
        });

        let connector = WebSocketConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(2));
        let mut halves = connector.connect().await.unwrap();
        halves.outbound.send("hello".to_string()).await.unwrap();
        assert_eq!(halves.inbound.recv().await.unwrap(), "echo:hello");
    }

    #[tokio::test]
    async fn test_secure_websocket_urls_attempt_a_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hang up: the handshake fails, but only after TLS was tried.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let connector = WebSocketConnector::new(format!("wss://{addr}/ws"), Duration::from_secs(2));
        let err = connector.connect().await.unwrap_err();
        assert!(
            !err.to_string().contains("TLS support not compiled in"),
            "unexpected error: {err}"
        );
    }
}
