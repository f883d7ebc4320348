//! Cache Writer
//!
//! Applies normalized records to the market store. Writes are keyed by
//! canonical id and never read first, so the store's upsert is the only
//! ordering point between concurrent writers.
//!
//! Failures are logged and counted, never retried: the next tick for the
//! same id re-upserts a fresher value.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::ports::{MarketStore, StoreError};
use crate::domain::market::{CanonicalRecord, ProviderTicker};
use crate::domain::normalizer::{self, NormalizeError};
use crate::infrastructure::metrics::{self, TickSource};

/// Default bound on a single upsert.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of applying one upstream ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Record normalized and upserted.
    Written(CanonicalRecord),
    /// Ticker dropped by the normalizer; nothing was written.
    Dropped(NormalizeError),
    /// Store write failed; nothing is retried.
    Failed(StoreError),
}

impl WriteOutcome {
    /// Whether the record reached the store.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

/// Idempotent writer in front of a [`MarketStore`].
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn MarketStore>,
    write_timeout: Duration,
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl CacheWriter {
    /// Create a writer with the given store and per-write time bound.
    #[must_use]
    pub fn new(store: Arc<dyn MarketStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    /// Upsert a single record, bounded by the write timeout.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or [`StoreError::Timeout`] if the write did
    /// not complete in time.
    pub async fn upsert(&self, record: CanonicalRecord) -> Result<(), StoreError> {
        let asset_class = record.asset_class.as_str();
        let started = Instant::now();

        match tokio::time::timeout(self.write_timeout, self.store.upsert(record)).await {
            Ok(Ok(())) => {
                metrics::record_write(asset_class, started.elapsed());
                Ok(())
            }
            Ok(Err(e)) => {
                metrics::record_write_failure("store");
                Err(e)
            }
            Err(_) => {
                metrics::record_write_failure("timeout");
                Err(StoreError::Timeout(self.write_timeout))
            }
        }
    }

    /// Normalize an upstream ticker and upsert the result.
    pub async fn apply(&self, ticker: &ProviderTicker, source: TickSource) -> WriteOutcome {
        metrics::record_tick_received(source);

        let record = match normalizer::normalize(ticker) {
            Ok(record) => record,
            Err(e) => {
                metrics::record_normalize_failure();
                tracing::warn!(
                    inst_id = %ticker.inst_id,
                    source = source.as_str(),
                    error = %e,
                    "Dropping malformed ticker"
                );
                return WriteOutcome::Dropped(e);
            }
        };

        match self.upsert(record.clone()).await {
            Ok(()) => {
                tracing::trace!(
                    id = %record.id,
                    price = %record.last_price,
                    source = source.as_str(),
                    "Record upserted"
                );
                WriteOutcome::Written(record)
            }
            Err(e) => {
                tracing::error!(id = %record.id, error = %e, "Market cache upsert failed");
                WriteOutcome::Failed(e)
            }
        }
    }
}
