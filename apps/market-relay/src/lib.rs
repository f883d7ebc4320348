#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Relay - Exchange Ticker Ingestion and Propagation
//!
//! Maintains a single connection to the OKX public tickers channel, maps each
//! instrument to a canonical record, upserts it into the shared market cache
//! and mirrors the cache into in-process subscribers that mark every price
//! move with a short-lived up/down flash. When the exchange is unreachable a
//! synthetic generator keeps the cache moving until the feed comes back.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure market types and rules
//!   - `market`: Canonical records, upstream tickers, tracked instruments
//!   - `normalizer`: Instrument classification and record building
//!   - `flash`: Subscriber entries and flash direction
//!   - `candle`: Local OHLC candles
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Market store trait, change feed and feed events
//!   - `services`: Cache writer, ingestion supervisor, synthetic generator,
//!     change subscriber
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `okx`: WebSocket feed connector (heartbeat, reconnect, proxy tunnel)
//!   - `store`: In-memory market store with a broadcast change feed
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and market HTTP endpoints
//!
//! # Data Flow
//!
//! ```text
//! OKX tickers WS ---> FeedConnector --FeedEvent--> IngestionSupervisor
//!                                                     |        ^
//!                                       (unreachable) |        | ticks
//!                                                     v        |
//!                                            SyntheticGenerator
//!                                                     |
//!                                                CacheWriter --upsert--> MarketStore
//!                                                                            |
//!                                                                       change feed
//!                                                                            v
//!                                                                   ChangeSubscriber
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market types and pure transformations.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::candle::{Candle, CandleSeries};
pub use domain::flash::{ClientMarketEntry, FlashDirection};
pub use domain::market::{
    AssetClass, CanonicalRecord, ProviderTicker, TrackedInstrument, default_instruments,
};
pub use domain::normalizer::{NormalizeError, normalize};

// Ports
pub use application::ports::{
    ChangeEvent, ChangeFeed, ChangeKind, FeedEvent, MarketStore, StoreError,
};

// Services
pub use application::services::{
    CacheWriter, ChangeSubscriber, IngestionStatus, IngestionSupervisor, ProducerKind,
    SubscriberConfig, SubscriberError, SyntheticConfig, SyntheticGenerator, WriteOutcome,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Feed connector
pub use infrastructure::okx::{FeedConnector, FeedConnectorConfig, FeedConnectorError};

// Store
pub use infrastructure::store::InMemoryStore;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
