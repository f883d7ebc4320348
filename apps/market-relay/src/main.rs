//! Market Relay Binary
//!
//! Starts the ticker relay: feed connector, ingestion supervisor, market
//! cache, change subscriber and health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-relay
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `OKX_WS_URL`: Public WebSocket endpoint (default: wss://ws.okx.com:8443/ws/v5/public)
//! - `HTTPS_PROXY` / `HTTP_PROXY`: Forward proxy for the upstream connection
//! - `MARKET_RELAY_INSTRUMENTS`: `INST=REFPRICE,...` (default: built-in list)
//! - `MARKET_RELAY_HEARTBEAT_INTERVAL_SECS` / `MARKET_RELAY_HEARTBEAT_TIMEOUT_SECS`
//! - `MARKET_RELAY_CONNECT_TIMEOUT_SECS`
//! - `MARKET_RELAY_RECONNECT_DELAY_MS` / `MARKET_RELAY_RECONNECT_BACKOFF` (fixed | exponential)
//! - `MARKET_RELAY_RECONNECT_DELAY_MAX_SECS` / `MARKET_RELAY_MAX_RECONNECT_ATTEMPTS`
//! - `MARKET_RELAY_SYNTHETIC_ENABLED` / `MARKET_RELAY_SYNTHETIC_CADENCE_MS`
//! - `MARKET_RELAY_FLASH_CLEAR_MS`
//! - `MARKET_RELAY_WRITE_TIMEOUT_MS` / `MARKET_RELAY_CHANGE_FEED_CAPACITY`
//! - `MARKET_RELAY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_relay::application::services::{
    CacheWriter, ChangeSubscriber, IngestionStatus, IngestionSupervisor,
};
use market_relay::infrastructure::health::{HealthServer, HealthServerState};
use market_relay::infrastructure::okx::FeedConnector;
use market_relay::infrastructure::store::{InMemoryStore, SharedStore};
use market_relay::infrastructure::telemetry;
use market_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer between the feed connector and the supervisor.
const FEED_EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Err only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Market cache and its writer
    let store: SharedStore = Arc::new(InMemoryStore::new(config.store.change_feed_capacity));
    let writer = CacheWriter::new(store.clone(), config.store.write_timeout);

    // Consumer side: mirror the cache before any producer starts
    let subscriber = Arc::new(ChangeSubscriber::new(
        store.clone(),
        config.subscriber.subscriber_config(),
        shutdown_token.clone(),
    ));
    subscriber
        .initialize_realtime()
        .await
        .context("change subscriber failed to start")?;

    // Producer side
    let status = Arc::new(IngestionStatus::new());
    let (event_tx, event_rx) = mpsc::channel(FEED_EVENT_BUFFER);

    let supervisor = IngestionSupervisor::new(
        writer,
        config.feed.instruments.clone(),
        config.synthetic.generator_config(),
        Arc::clone(&status),
        shutdown_token.clone(),
    );
    let connector = FeedConnector::new(
        config.feed.connector_config(),
        event_tx,
        shutdown_token.clone(),
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&status),
        Arc::clone(&subscriber),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let supervisor_handle = tokio::spawn(supervisor.run(event_rx));

    let connector_shutdown = shutdown_token.clone();
    let connector_handle = tokio::spawn(async move {
        if let Err(e) = connector.run().await
            && !connector_shutdown.is_cancelled()
        {
            tracing::error!(error = %e, "Feed connector stopped");
            // Without a connector there is nothing left to relay.
            connector_shutdown.cancel();
        }
    });

    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Market relay ready");

    await_shutdown(shutdown_token).await;

    subscriber.unsubscribe_realtime();
    drain([supervisor_handle, connector_handle, health_handle]).await;

    tracing::info!("Market relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        url = %config.feed.url,
        instruments = config.feed.instruments.len(),
        proxy = config.feed.proxy.as_ref().map(|p| p.addr()).unwrap_or_default(),
        synthetic_enabled = config.synthetic.enabled,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.feed.heartbeat_interval.as_secs(),
        heartbeat_timeout_secs = config.feed.heartbeat_timeout.as_secs(),
        reconnect_delay_ms = config.feed.reconnect_delay.as_millis(),
        exponential_backoff = config.feed.exponential_backoff,
        flash_clear_ms = config.subscriber.flash_clear.as_millis(),
        "Timing settings"
    );
}

/// Wait for every task to finish, up to the shutdown timeout.
async fn drain<const N: usize>(handles: [JoinHandle<()>; N]) {
    let all = futures_util::future::join_all(handles);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, all).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Task ended abnormally");
                }
            }
        }
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with tasks still running"
        ),
    }
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or an internal cancel).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
