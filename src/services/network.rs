use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared view of whether the backend is currently reachable.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network reachability changed");
        }
    }

    /// Resolve once the network is reachable.
    pub async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|online| *online).await;
    }

    /// Spawn a task that probes `url` every `every` and updates the flag.
    /// Any HTTP response counts as reachable; only transport errors do not.
    pub fn spawn_probe(&self, http: reqwest::Client, url: String, every: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let reachable = http.head(&url).send().await.is_ok();
                tracing::trace!(reachable, url = %url, "Reachability probe");
                monitor.set_online(reachable);
            }
        })
    }
}
