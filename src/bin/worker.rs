//! One-shot queue drain: delivers everything queued locally, then exits.
//! Useful from a platform background-task hook where no server runs.
//!
//! Exits with status 75 (EX_TEMPFAIL) when jobs were left for a retry or the
//! run was interrupted, so the caller knows to schedule another run.

use scan_relay_client::{
    app_state::AppState,
    config::AppConfig,
    services::worker::DrainQueue,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_RETRY_LATER: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting one-shot queue drain");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize client state");

    if let Err(e) = state.transport.init().await {
        tracing::warn!(error = %e, "Persistent channel unavailable, using HTTP only");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let report = state.worker.drain(&cancel).await;
    ctrl_c.abort();
    state.transport.close();

    let remaining = state.store.queue_depth().await.unwrap_or(-1);
    tracing::info!(
        processed = report.processed,
        delivered = report.delivered,
        failed = report.failed,
        retry_after_ms = report.retry_after.map(|d| d.as_millis() as u64),
        cancelled = report.cancelled,
        remaining,
        "Drain complete"
    );

    if report.needs_rerun() {
        ExitCode::from(EXIT_RETRY_LATER)
    } else {
        ExitCode::SUCCESS
    }
}
