//! Hedged scan delivery.
//!
//! Each scan is pushed over the persistent channel tagged with a fresh message
//! id, then we wait up to the hedge delay for `{"ack": <msg id>}`. If the ack
//! does not arrive in time the same message (same id) goes out over the
//! reliable path and its answer is returned. The server deduplicates on the
//! message id, so a scan delivered on both paths is stored once.
//!
//! Acks are correlated through [`PendingAcks`]. An entry lives exactly as long
//! as the `send` call that registered it; acks for unknown ids are dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::HedgeConfig;
use crate::models::job::ScanPayload;
use crate::models::message::{AckFrame, DeliveryPath, ScanMessage, SendOutcome};
use crate::services::transport::{ChannelConnector, ReliableSender, TransportResult};

/// Something that can deliver a scan to the backend.
#[async_trait]
pub trait ScanSender: Send + Sync {
    async fn send(
        &self,
        scan: &ScanPayload,
        captured_at: DateTime<Utc>,
    ) -> TransportResult<SendOutcome>;
}

struct PendingAck {
    tx: oneshot::Sender<Option<String>>,
    registered_at: Instant,
}

/// In-flight message ids waiting for a fast-path ack.
#[derive(Default)]
pub struct PendingAcks {
    entries: Mutex<HashMap<Uuid, PendingAck>>,
}

impl PendingAcks {
    /// Start waiting for `msg_id`. The entry is removed when the returned
    /// registration is dropped.
    pub fn register(
        self: &Arc<Self>,
        msg_id: Uuid,
    ) -> (AckRegistration, oneshot::Receiver<Option<String>>) {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            msg_id,
            PendingAck {
                tx,
                registered_at: Instant::now(),
            },
        );
        let registration = AckRegistration {
            table: Arc::clone(self),
            msg_id,
        };
        (registration, rx)
    }

    /// Deliver an ack. Returns `false` if nobody is waiting for `msg_id`.
    pub fn complete(&self, msg_id: Uuid, checksum: Option<String>) -> bool {
        let Some(entry) = self.entries.lock().remove(&msg_id) else {
            return false;
        };
        entry.tx.send(checksum).is_ok()
    }

    pub fn remove(&self, msg_id: Uuid) -> bool {
        self.entries.lock().remove(&msg_id).is_some()
    }

    /// Drop entries older than `max_age`; returns how many were dropped.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.registered_at.elapsed() < max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its pending-ack entry on drop, including when `send` is cancelled.
pub struct AckRegistration {
    table: Arc<PendingAcks>,
    msg_id: Uuid,
}

impl Drop for AckRegistration {
    fn drop(&mut self) {
        self.table.remove(self.msg_id);
    }
}

struct Shared {
    outbound: RwLock<Option<mpsc::Sender<String>>>,
    pending: Arc<PendingAcks>,
}

impl Shared {
    fn handle_frame(&self, frame: &str) {
        match serde_json::from_str::<AckFrame>(frame) {
            Ok(ack) => {
                if !self.pending.complete(ack.ack, ack.checksum) {
                    tracing::debug!(msg_id = %ack.ack, "Discarding ack with no waiter");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring non-ack frame"),
        }
    }

    /// Fire-and-forget push. Returns whether the frame was handed to the channel.
    fn push(&self, message: &ScanMessage) -> bool {
        let guard = self.outbound.read();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(msg_id = %message.msg_id, error = %e, "Failed to encode fast-path frame");
                return false;
            }
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(msg_id = %message.msg_id, "Persistent channel busy, skipping fast path");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(guard);
                self.outbound.write().take();
                false
            }
        }
    }
}

/// Dual-path scan client racing a persistent channel against a reliable call.
pub struct HedgedTransportClient {
    config: HedgeConfig,
    connector: Option<Arc<dyn ChannelConnector>>,
    fallback: Arc<dyn ReliableSender>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HedgedTransportClient {
    /// `connector` is `None` when no persistent channel is configured; every
    /// send then goes straight to the reliable path.
    pub fn new(
        config: HedgeConfig,
        connector: Option<Arc<dyn ChannelConnector>>,
        fallback: Arc<dyn ReliableSender>,
    ) -> Self {
        Self {
            config,
            connector,
            fallback,
            shared: Arc::new(Shared {
                outbound: RwLock::new(None),
                pending: Arc::new(PendingAcks::default()),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Open the persistent channel and start the ack reader and expiry sweeper.
    pub async fn init(&self) -> TransportResult<()> {
        let Some(connector) = &self.connector else {
            tracing::info!("No persistent channel configured, using reliable path only");
            return Ok(());
        };

        let halves = connector.connect().await?;
        *self.shared.outbound.write() = Some(halves.outbound);

        let mut inbound = halves.inbound;
        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                shared.handle_frame(&frame);
            }
            shared.outbound.write().take();
            tracing::info!("Persistent channel reader stopped, fast path disabled");
        });

        let pending = Arc::clone(&self.shared.pending);
        let expiry = self.config.ack_expiry;
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(expiry);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if pending.is_empty() {
                    continue;
                }
                let expired = pending.sweep_expired(expiry);
                if expired > 0 {
                    tracing::debug!(expired, "Swept expired pending acks");
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(reader);
        tasks.push(sweeper);
        Ok(())
    }

    /// Drop the persistent channel and stop background tasks.
    pub fn close(&self) {
        self.shared.outbound.write().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn is_channel_open(&self) -> bool {
        self.shared
            .outbound
            .read()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of sends currently waiting for a fast-path ack.
    pub fn pending_acks(&self) -> usize {
        self.shared.pending.len()
    }

    async fn send_message(&self, message: ScanMessage) -> TransportResult<SendOutcome> {
        let started = Instant::now();
        let (_registration, ack) = self.shared.pending.register(message.msg_id);

        if self.shared.push(&message) {
            if let Ok(Ok(checksum)) = tokio::time::timeout(self.config.hedge_delay, ack).await {
                let outcome = SendOutcome {
                    msg_id: message.msg_id,
                    path: DeliveryPath::FastPath,
                    checksum,
                };
                record_latency(outcome.path, started);
                return Ok(outcome);
            }
            tracing::debug!(msg_id = %message.msg_id, "Hedge delay elapsed, using reliable path");
        }

        let receipt = self.fallback.submit_scan(&message).await?;
        let outcome = SendOutcome {
            msg_id: message.msg_id,
            path: DeliveryPath::Fallback,
            checksum: receipt.checksum,
        };
        record_latency(outcome.path, started);
        Ok(outcome)
    }
}

fn record_latency(path: DeliveryPath, started: Instant) {
    metrics::histogram!("hedged_send_seconds", "path" => path.as_str())
        .record(started.elapsed().as_secs_f64());
}

#[async_trait]
impl ScanSender for HedgedTransportClient {
    async fn send(
        &self,
        scan: &ScanPayload,
        captured_at: DateTime<Utc>,
    ) -> TransportResult<SendOutcome> {
        let message = ScanMessage {
            msg_id: Uuid::new_v4(),
            barcode: scan.barcode.clone(),
            symbology: scan.symbology.clone(),
            order_id: scan.order_id.clone(),
            timestamp: captured_at.timestamp_millis(),
        };
        self.send_message(message).await
    }
}

impl Drop for HedgedTransportClient {
    fn drop(&mut self) {
        self.close();
    }
}
