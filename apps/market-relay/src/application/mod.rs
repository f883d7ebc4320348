//! Application Layer - Use cases and port definitions.
//!
//! Ports describe the market store and the feed connector's event stream;
//! services implement ingestion and consumer-side propagation on top of them.

/// Port interfaces for the market store and feed events.
pub mod ports;

/// Ingestion, cache writing and change subscription services.
pub mod services;
