use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Local API bind address for the UI layer.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string for the event store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Backend base URL for the reliable request/response endpoints
    pub backend_base_url: String,

    /// Backend persistent channel URL (ws:// or wss://). No fast path when unset.
    pub backend_ws_url: Option<String>,

    /// Bearer token sent to the backend
    pub api_token: Option<String>,

    /// Blind relay base URL. Mesh features are disabled when unset.
    pub relay_base_url: Option<String>,

    #[serde(default = "default_mesh_id")]
    pub mesh_id: String,

    /// Stable instance id of this device in the mesh
    pub instance_id: Option<String>,

    #[serde(default = "default_external_ip")]
    pub external_ip: String,

    #[serde(default)]
    pub external_port: u16,

    #[serde(default = "default_relay_heartbeat_secs")]
    pub relay_heartbeat_secs: u64,

    /// AES-256-GCM key for mesh envelopes (base64-encoded, 32 bytes)
    pub relay_key: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    #[serde(default = "default_hedge_delay_ms")]
    pub hedge_delay_ms: u64,

    #[serde(default = "default_ack_expiry_secs")]
    pub ack_expiry_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    #[serde(default = "default_retry_backoff_max_secs")]
    pub retry_backoff_max_secs: u64,

    #[serde(default = "default_periodic_drain_secs")]
    pub periodic_drain_secs: u64,

    /// Upper bound on jobs handled per drain run. Unset drains the whole backlog.
    pub max_jobs_per_run: Option<usize>,

    #[serde(default = "default_reachability_probe_secs")]
    pub reachability_probe_secs: u64,

    /// Age after which terminal events are purged
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_database_url() -> String {
    "sqlite://scan-relay.db".to_string()
}

fn default_mesh_id() -> String {
    "default".to_string()
}

fn default_external_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_relay_heartbeat_secs() -> u64 {
    60
}

fn default_max_retries() -> i32 {
    3
}

fn default_hedge_delay_ms() -> u64 {
    300
}

fn default_ack_expiry_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_retry_backoff_base_ms() -> u64 {
    2000
}

fn default_retry_backoff_max_secs() -> u64 {
    300
}

fn default_periodic_drain_secs() -> u64 {
    900
}

fn default_reachability_probe_secs() -> u64 {
    30
}

fn default_retention_days() -> i64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.retry_backoff_base_ms),
            backoff_max: Duration::from_secs(self.retry_backoff_max_secs),
            periodic_interval: Duration::from_secs(self.periodic_drain_secs),
            max_jobs_per_run: self.max_jobs_per_run,
        }
    }

    pub fn hedge(&self) -> HedgeConfig {
        HedgeConfig {
            hedge_delay: Duration::from_millis(self.hedge_delay_ms),
            ack_expiry: Duration::from_secs(self.ack_expiry_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    /// Relay settings, or `None` when no relay is configured.
    pub fn relay(&self) -> Option<RelayConfig> {
        let base_url = self.relay_base_url.clone()?;
        Some(RelayConfig {
            base_url,
            mesh_id: self.mesh_id.clone(),
            instance_id: self
                .instance_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        })
    }
}

/// Retry and trigger policy for the durable queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_retries: i32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub periodic_interval: Duration,
    pub max_jobs_per_run: Option<usize>,
}

impl QueueConfig {
    /// Delay before re-running a job that has failed `retries` times.
    pub fn backoff_for(&self, retries: i32) -> Duration {
        let exponent = retries.saturating_sub(1).clamp(0, 16) as u32;
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: Duration::from_millis(default_retry_backoff_base_ms()),
            backoff_max: Duration::from_secs(default_retry_backoff_max_secs()),
            periodic_interval: Duration::from_secs(default_periodic_drain_secs()),
            max_jobs_per_run: None,
        }
    }
}

/// Timing for the hedged scan transport.
#[derive(Debug, Clone)]
pub struct HedgeConfig {
    pub hedge_delay: Duration,
    pub ack_expiry: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            hedge_delay: Duration::from_millis(default_hedge_delay_ms()),
            ack_expiry: Duration::from_secs(default_ack_expiry_secs()),
            connect_timeout: Duration::from_secs(default_connect_timeout_secs()),
            read_timeout: Duration::from_secs(default_read_timeout_secs()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    pub mesh_id: String,
    pub instance_id: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = QueueConfig {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            ..QueueConfig::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
        assert_eq!(config.backoff_for(4), Duration::from_secs(10));
    }
}
