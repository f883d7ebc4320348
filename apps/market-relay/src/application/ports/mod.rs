//! Port Interfaces
//!
//! Contracts between the ingestion core and the systems around it.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`MarketStore`]: durable shared market cache (upsert-by-key, full
//!   snapshot query, change-notification stream)
//!
//! ## Driver Ports (Inbound)
//!
//! - [`FeedEvent`]: lifecycle and data events emitted by an upstream feed
//!   connector and consumed by the ingestion supervisor

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::market::{CanonicalRecord, ProviderTicker};

// =============================================================================
// Market Store
// =============================================================================

/// Kind of row change delivered by a store's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First write for this id.
    Insert,
    /// Replacement of an existing row.
    Update,
}

/// A row change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Insert or update.
    pub kind: ChangeKind,
    /// The row as written.
    pub record: CanonicalRecord,
}

/// Change notifications in write order for a single subscription.
pub type ChangeFeed = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Market store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the write.
    #[error("store rejected write for {id}: {reason}")]
    Rejected {
        /// Record id.
        id: String,
        /// Reason given by the store.
        reason: String,
    },

    /// Operation exceeded its time bound.
    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A subscriber fell behind and missed notifications.
    #[error("change feed lagged, {0} notifications skipped")]
    Lagged(u64),

    /// The change feed was closed by the store.
    #[error("change feed closed")]
    FeedClosed,
}

/// Durable shared market cache.
///
/// Writers never read before writing; `upsert` keyed by
/// [`CanonicalRecord::id`] is the only synchronization primitive, which makes
/// concurrent writers safe without locking at the writer layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Insert or replace the row for `record.id`.
    async fn upsert(&self, record: CanonicalRecord) -> Result<(), StoreError>;

    /// Return every current row.
    async fn snapshot(&self) -> Result<Vec<CanonicalRecord>, StoreError>;

    /// Subscribe to row changes made after this call returns.
    async fn subscribe(&self) -> Result<ChangeFeed, StoreError>;
}

// =============================================================================
// Feed Events
// =============================================================================

/// Events emitted by an upstream feed connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Opening a connection.
    Connecting {
        /// Connection attempt number since the last successful subscribe.
        attempt: u32,
    },
    /// Connected and subscription request sent.
    Subscribed {
        /// Number of instruments requested.
        instruments: usize,
    },
    /// Connection closed or failed; a reconnect will follow.
    Disconnected {
        /// Reason for the disconnect.
        reason: String,
    },
    /// The endpoint is categorically unreachable from this network.
    Unreachable {
        /// Underlying failure.
        reason: String,
    },
    /// Upstream ticker to normalize.
    Ticker(ProviderTicker),
}
