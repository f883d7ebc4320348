//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, ingestion status, the subscriber's market
//! map and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (a producer is active and the subscriber is live)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /markets` - Subscriber entries sorted by symbol
//! - `GET /markets/{id}/candles` - Candle history for one canonical id

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    ChangeSubscriber, IngestionStatus, ProducerKind, StatusSnapshot,
};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Ingestion status.
    pub ingestion: StatusSnapshot,
    /// Change subscriber status.
    pub subscriber: SubscriberStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Live upstream data reaching an active subscriber.
    Healthy,
    /// Serving, but from synthetic data or with the subscriber offline.
    Degraded,
    /// Nothing is producing.
    Unhealthy,
}

/// Change subscriber status.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriberStatus {
    /// Whether the change feed is being consumed.
    pub active: bool,
    /// Entries held.
    pub entries: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    ingestion: Arc<IngestionStatus>,
    subscriber: Arc<ChangeSubscriber>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        ingestion: Arc<IngestionStatus>,
        subscriber: Arc<ChangeSubscriber>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            ingestion,
            subscriber,
        }
    }
}

/// Build the HTTP routes.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/markets", get(markets_handler))
        .route("/markets/{id}/candles", get(candles_handler))
        .with_state(state)
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let producing = state.ingestion.producer() != ProducerKind::Idle;

    if producing && state.subscriber.is_active() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn markets_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.subscriber.markets_by_symbol())
}

async fn candles_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.subscriber.candles(&id) {
        Some(candles) => Json(candles).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown market {id}")).into_response(),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let ingestion = state.ingestion.snapshot();
    let subscriber = SubscriberStatus {
        active: state.subscriber.is_active(),
        entries: state.subscriber.len(),
    };

    HealthResponse {
        status: determine_health_status(ingestion.producer, subscriber.active),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        ingestion,
        subscriber,
    }
}

const fn determine_health_status(producer: ProducerKind, subscriber_active: bool) -> HealthStatus {
    match (producer, subscriber_active) {
        (ProducerKind::Idle, _) => HealthStatus::Unhealthy,
        (ProducerKind::Upstream, true) => HealthStatus::Healthy,
        (ProducerKind::Upstream | ProducerKind::Synthetic, _) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
