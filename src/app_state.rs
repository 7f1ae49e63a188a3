use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db;
use crate::services::{
    capture::CaptureService,
    encryption::EnvelopeCipher,
    event_store::{EventStore, SqliteEventStore},
    hedged::HedgedTransportClient,
    network::NetworkMonitor,
    relay::RelayProtocolClient,
    scheduler::QueueScheduler,
    transport::{build_http_client, ChannelConnector, HttpFallback, WebSocketConnector},
    upload::{DirectUploader, HttpImageUploader, ImageUploader},
    worker::QueueWorker,
};

/// Shared client state passed to route handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: Arc<dyn EventStore>,
    pub transport: Arc<HedgedTransportClient>,
    pub worker: Arc<QueueWorker>,
    pub scheduler: QueueScheduler,
    pub capture: CaptureService,
    pub direct: Arc<DirectUploader>,
    pub network: NetworkMonitor,
    pub relay: Option<Arc<RelayProtocolClient>>,
    pub envelopes: Option<Arc<EnvelopeCipher>>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Open the store and wire every component from configuration.
    ///
    /// The persistent channel is not opened here; call
    /// `transport.init()` once the runtime is up.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!(database_url = %config.database_url, "Opening event store");
        let db_pool = db::init_pool(&config.database_url).await?;
        db::run_migrations(&db_pool).await?;
        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(db_pool.clone()));

        let hedge = config.hedge();
        let http = build_http_client(hedge.connect_timeout, hedge.read_timeout)?;

        let connector = config.backend_ws_url.as_ref().map(|url| {
            Arc::new(WebSocketConnector::new(url.clone(), hedge.connect_timeout))
                as Arc<dyn ChannelConnector>
        });
        let fallback = Arc::new(HttpFallback::new(
            http.clone(),
            config.backend_base_url.clone(),
            config.api_token.clone(),
        ));
        let transport = Arc::new(HedgedTransportClient::new(hedge, connector, fallback));

        let uploader: Arc<dyn ImageUploader> = Arc::new(HttpImageUploader::new(
            http.clone(),
            config.backend_base_url.clone(),
            config.api_token.clone(),
        ));

        let worker = Arc::new(QueueWorker::new(
            store.clone(),
            transport.clone(),
            uploader.clone(),
            config.queue(),
        ));
        let network = NetworkMonitor::new(true);
        let scheduler = QueueScheduler::new(worker.clone(), network.clone());
        let capture = CaptureService::new(store.clone(), scheduler.clone());
        let direct = Arc::new(DirectUploader::new(store.clone(), uploader));

        let relay = match config.relay() {
            Some(relay_config) => {
                tracing::info!(
                    relay = %relay_config.base_url,
                    mesh_id = %relay_config.mesh_id,
                    instance_id = %relay_config.instance_id,
                    "Relay configured"
                );
                Some(Arc::new(RelayProtocolClient::new(&relay_config)?))
            }
            None => None,
        };
        let envelopes = match &config.relay_key {
            Some(key) => Some(Arc::new(EnvelopeCipher::new(key)?)),
            None => None,
        };

        Ok(Self {
            db: db_pool,
            store,
            transport,
            worker,
            scheduler,
            capture,
            direct,
            network,
            relay,
            envelopes,
            http,
        })
    }
}
