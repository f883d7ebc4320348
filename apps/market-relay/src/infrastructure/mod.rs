//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process-level concerns.

/// OKX public WebSocket feed connector.
pub mod okx;

/// Market cache implementations.
pub mod store;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
