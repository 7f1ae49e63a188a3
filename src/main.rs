use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use scan_relay_client::{app_state::AppState, config::AppConfig, routes};

const PURGE_INTERVAL_SECS: u64 = 6 * 60 * 60;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing scan-relay-client");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("capture_events_total", "Capture events persisted locally");
    metrics::describe_counter!(
        "queue_jobs_completed_total",
        "Queue jobs delivered and removed"
    );
    metrics::describe_counter!(
        "queue_jobs_failed_total",
        "Queue jobs whose event was marked failed"
    );
    metrics::describe_counter!("queue_job_retries_total", "Transient delivery failures");
    metrics::describe_gauge!("queue_depth", "Jobs waiting in the local queue");
    metrics::describe_histogram!(
        "hedged_send_seconds",
        "Time from send to acknowledgement, by delivery path"
    );
    metrics::describe_counter!("relay_calls_failed_total", "Failed relay protocol calls");

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize client state");

    if let Err(e) = state.transport.init().await {
        tracing::warn!(error = %e, "Persistent channel unavailable, scans will use the HTTP path");
    }

    state.network.spawn_probe(
        state.http.clone(),
        config.backend_base_url.clone(),
        Duration::from_secs(config.reachability_probe_secs),
    );

    // Anything left over from the previous run goes out first.
    state
        .scheduler
        .schedule_periodic(Duration::from_secs(config.periodic_drain_secs));
    state.scheduler.schedule();

    if let Some(relay) = state.relay.clone() {
        let external_ip = config.external_ip.clone();
        let port = config.external_port;
        let every = Duration::from_secs(config.relay_heartbeat_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                // Failures are counted and logged by the client.
                let _ = relay.heartbeat(&external_ip, port, Some("online")).await;
            }
        });
    }

    {
        let store = state.store.clone();
        let retention = chrono::Duration::days(config.retention_days);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                match store.purge_older_than(retention).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "Purged settled events"),
                    Err(e) => tracing::warn!(error = %e, "Event purge failed"),
                }
            }
        });
    }

    let app = routes::router(state.clone(), prometheus_handle);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Local API listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    state.scheduler.cancel();
    state.transport.close();
    tracing::info!("scan-relay-client stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
