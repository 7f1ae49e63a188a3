//! Decides when the queue gets drained.
//!
//! At most one drain run exists at any time. `schedule()` while a run is
//! pending or active does not start another one; it only marks that the
//! current run should go around once more before stopping, so a capture that
//! lands just as a run finishes is never stranded.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::services::network::NetworkMonitor;
use crate::services::worker::DrainQueue;

#[derive(Debug, Default)]
struct RunState {
    active: bool,
    rerun: bool,
}

struct Inner {
    drainer: Arc<dyn DrainQueue>,
    network: NetworkMonitor,
    state: Mutex<RunState>,
    cancel: Mutex<CancellationToken>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    idle: Notify,
}

#[derive(Clone)]
pub struct QueueScheduler {
    inner: Arc<Inner>,
}

impl QueueScheduler {
    pub fn new(drainer: Arc<dyn DrainQueue>, network: NetworkMonitor) -> Self {
        Self {
            inner: Arc::new(Inner {
                drainer,
                network,
                state: Mutex::new(RunState::default()),
                cancel: Mutex::new(CancellationToken::new()),
                periodic: Mutex::new(None),
                idle: Notify::new(),
            }),
        }
    }

    /// Request a drain run. Never fails; outcomes surface through job state.
    pub fn schedule(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.active {
                state.rerun = true;
                tracing::trace!("Drain already pending, request collapsed");
                return;
            }
            state.active = true;
        }

        let cancel = self.inner.cancel.lock().clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(cancel).await });
    }

    /// Also request a drain every `every`, so the queue empties without new captures.
    pub fn schedule_periodic(&self, every: Duration) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracing::debug!("Periodic drain trigger");
                scheduler.schedule();
            }
        });

        if let Some(previous) = self.inner.periodic.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the periodic trigger and any pending or running drain.
    pub fn cancel(&self) {
        if let Some(periodic) = self.inner.periodic.lock().take() {
            periodic.abort();
        }
        self.inner.state.lock().rerun = false;

        let mut cancel = self.inner.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
        tracing::info!("Queue scheduling cancelled");
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Resolve once no drain is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    async fn run(&self, mut cancel: CancellationToken) {
        loop {
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = self.network.wait_online() => false,
            };

            if !cancelled {
                let report = self.drainer.drain(&cancel).await;

                if let (Some(delay), false) = (report.retry_after, report.cancelled) {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off before next drain");
                    let interrupted = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if !interrupted {
                        continue;
                    }
                }
            }

            let mut state = self.state.lock();
            if state.rerun {
                state.rerun = false;
                drop(state);
                cancel = self.cancel.lock().clone();
                continue;
            }
            state.active = false;
            break;
        }
        self.idle.notify_waiters();
    }
}
