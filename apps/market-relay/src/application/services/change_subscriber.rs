//! Change Subscriber
//!
//! Consumer-side mirror of the market cache. Each subscriber owns its own
//! `id -> ClientMarketEntry` map, fed by a store snapshot and then by the
//! store's change feed.
//!
//! # Activation
//!
//! [`ChangeSubscriber::initialize_realtime`] subscribes to the change feed
//! before loading the snapshot, so rows written in between are replayed by the
//! feed rather than lost. Snapshot rows never flash.
//!
//! # Flash Clearing
//!
//! Every live update that flashes schedules exactly one clear after the flash
//! delay. Clears are neither reset nor merged by later updates for the same
//! id, so a burst of updates may clear the marker earlier than 500 ms after
//! the last one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChangeFeed, MarketStore, StoreError};
use crate::domain::candle::{self, Candle, CandleSeries};
use crate::domain::flash::{ClientMarketEntry, FlashDirection};
use crate::domain::market::CanonicalRecord;
use crate::infrastructure::metrics::{self, UpdateOrigin};

/// Default lifetime of a flash marker.
pub const DEFAULT_FLASH_CLEAR: Duration = Duration::from_millis(500);

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Change subscriber settings.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberConfig {
    /// Delay before a flash marker is cleared.
    pub flash_clear: Duration,
    /// Candle bucket width.
    pub candle_interval: TimeDelta,
    /// Candles retained per id.
    pub candle_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            flash_clear: DEFAULT_FLASH_CLEAR,
            candle_interval: candle::DEFAULT_INTERVAL,
            candle_capacity: candle::DEFAULT_CAPACITY,
        }
    }
}

/// Activation errors. The subscriber is left inactive and may be retried.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// Change feed subscription failed.
    #[error("change feed subscription failed: {0}")]
    Subscribe(#[source] StoreError),

    /// Initial snapshot could not be loaded.
    #[error("snapshot load failed: {0}")]
    Snapshot(#[source] StoreError),

    /// The subscriber's owner has shut down.
    #[error("subscriber is shut down")]
    ShutDown,
}

// =============================================================================
// Market Book
// =============================================================================

#[derive(Debug, Default)]
struct MarketBook {
    entries: HashMap<String, ClientMarketEntry>,
    candles: HashMap<String, CandleSeries>,
}

impl MarketBook {
    fn fold_candle(&mut self, record: &CanonicalRecord, config: &SubscriberConfig) {
        self.candles
            .entry(record.id.clone())
            .or_insert_with(|| CandleSeries::new(config.candle_interval, config.candle_capacity))
            .update(record.last_price, record.updated_at);
    }
}

/// State shared between the subscriber handle, its feed task and flash timers.
#[derive(Clone)]
struct Realtime {
    store: Arc<dyn MarketStore>,
    book: Arc<RwLock<MarketBook>>,
    active: Arc<AtomicBool>,
    config: SubscriberConfig,
}

impl Realtime {
    fn hydrate(&self, records: Vec<CanonicalRecord>) {
        let count = records.len();
        {
            let mut book = self.book.write();
            book.entries.clear();
            for record in records {
                book.fold_candle(&record, &self.config);
                book.entries
                    .insert(record.id.clone(), ClientMarketEntry::hydrated(record));
            }
        }
        for _ in 0..count {
            metrics::record_subscriber_update(UpdateOrigin::Snapshot);
        }
        tracing::debug!(entries = count, "Subscriber hydrated from snapshot");
    }

    fn apply_live(&self, record: CanonicalRecord, cancel: &CancellationToken) {
        let id = record.id.clone();
        let flash = {
            let mut book = self.book.write();
            // Replayed or reordered events must not roll a row back.
            if book
                .entries
                .get(&id)
                .is_some_and(|current| current.record.updated_at > record.updated_at)
            {
                tracing::trace!(id = %id, "Skipping stale change event");
                return;
            }
            book.fold_candle(&record, &self.config);
            let entry = ClientMarketEntry::updated(book.entries.get(&id), record);
            let flash = entry.flash;
            book.entries.insert(id.clone(), entry);
            flash
        };
        metrics::record_subscriber_update(UpdateOrigin::Live);

        if flash.is_active() {
            self.schedule_clear(id, cancel.clone());
        }
    }

    fn schedule_clear(&self, id: String, cancel: CancellationToken) {
        let book = Arc::clone(&self.book);
        let delay = self.config.flash_clear;

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(entry) = book.write().entries.get_mut(&id) {
                        entry.flash = FlashDirection::None;
                    }
                }
            }
        });
    }

    async fn run(self, mut feed: ChangeFeed, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Change subscriber stopped");
                    return;
                }
                item = feed.next() => match item {
                    Some(Ok(event)) => self.apply_live(event.record, &cancel),
                    Some(Err(StoreError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "Change feed lagged, re-hydrating");
                        match self.store.snapshot().await {
                            Ok(records) => self.hydrate(records),
                            Err(e) => {
                                tracing::error!(error = %e, "Re-hydration failed");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Change feed failed");
                        break;
                    }
                    None => {
                        tracing::warn!("Change feed closed");
                        break;
                    }
                }
            }
        }

        if !cancel.is_cancelled() {
            self.active.store(false, Ordering::Release);
        }
    }
}

// =============================================================================
// Change Subscriber
// =============================================================================

/// In-memory market map kept current from the store's change feed.
pub struct ChangeSubscriber {
    realtime: Realtime,
    shutdown: CancellationToken,
    session: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ChangeSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscriber")
            .field("active", &self.is_active())
            .field("entries", &self.len())
            .field("config", &self.realtime.config)
            .finish_non_exhaustive()
    }
}

impl ChangeSubscriber {
    /// Create an inactive subscriber. Cancelling `shutdown` stops the feed
    /// task and any pending flash clears.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketStore>,
        config: SubscriberConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            realtime: Realtime {
                store,
                book: Arc::new(RwLock::new(MarketBook::default())),
                active: Arc::new(AtomicBool::new(false)),
                config,
            },
            shutdown,
            session: Mutex::new(None),
        }
    }

    /// Start mirroring the store. No-op if already active.
    ///
    /// # Errors
    ///
    /// Returns an error if the change feed or snapshot cannot be obtained. The
    /// subscriber is then inactive and the call may be retried.
    pub async fn initialize_realtime(&self) -> Result<(), SubscriberError> {
        if self.shutdown.is_cancelled() {
            return Err(SubscriberError::ShutDown);
        }
        if self
            .realtime
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Realtime already active");
            return Ok(());
        }

        let feed = match self.realtime.store.subscribe().await {
            Ok(feed) => feed,
            Err(e) => {
                self.realtime.active.store(false, Ordering::Release);
                tracing::error!(error = %e, "Change feed subscription failed");
                return Err(SubscriberError::Subscribe(e));
            }
        };

        let records = match self.realtime.store.snapshot().await {
            Ok(records) => records,
            Err(e) => {
                self.realtime.active.store(false, Ordering::Release);
                tracing::error!(error = %e, "Snapshot load failed");
                return Err(SubscriberError::Snapshot(e));
            }
        };
        self.realtime.hydrate(records);

        let session = self.shutdown.child_token();
        if let Some(previous) = self.session.lock().replace(session.clone()) {
            previous.cancel();
        }
        tokio::spawn(self.realtime.clone().run(feed, session));

        tracing::info!(entries = self.len(), "Realtime market updates active");
        Ok(())
    }

    /// Stop consuming the change feed. Held entries are kept.
    pub fn unsubscribe_realtime(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel();
        }
        if self.realtime.active.swap(false, Ordering::AcqRel) {
            tracing::info!("Realtime market updates stopped");
        }
    }

    /// Whether the change feed is being consumed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.realtime.active.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    /// Copy of the current market map.
    #[must_use]
    pub fn markets(&self) -> HashMap<String, ClientMarketEntry> {
        self.realtime.book.read().entries.clone()
    }

    /// Current entries ordered by display symbol.
    #[must_use]
    pub fn markets_by_symbol(&self) -> Vec<ClientMarketEntry> {
        let mut entries: Vec<_> = self.realtime.book.read().entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.record
                .symbol
                .cmp(&b.record.symbol)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        entries
    }

    /// Entry for a canonical id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ClientMarketEntry> {
        self.realtime.book.read().entries.get(id).cloned()
    }

    /// Locally synthesized candles for a canonical id, oldest first.
    #[must_use]
    pub fn candles(&self, id: &str) -> Option<Vec<Candle>> {
        self.realtime
            .book
            .read()
            .candles
            .get(id)
            .map(|series| series.candles().copied().collect())
    }

    /// Number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.realtime.book.read().entries.len()
    }

    /// Whether no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
