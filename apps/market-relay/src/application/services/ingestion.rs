//! Ingestion Supervisor
//!
//! Single long-lived task that owns the active producer and routes its
//! tickers through the cache writer.
//!
//! ```text
//!              Unreachable                 Subscribed
//!   Idle ─────────────────▶ Synthetic ─────────────────▶ Upstream
//!    ▲                          ▲                           │
//!    │        Disconnected      │        Unreachable        │
//!    └──────────────────────────┼───────────────────────────┘
//!                               └── (after Disconnected) ───┘
//! ```
//!
//! Producer switches are not atomic: synthetic tickers already queued when
//! upstream takes over are discarded here, but writes already handed to the
//! store may still land after upstream ones.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache_writer::{CacheWriter, WriteOutcome};
use super::synthetic::{SyntheticConfig, SyntheticGenerator};
use crate::application::ports::FeedEvent;
use crate::domain::market::{ProviderTicker, TrackedInstrument};
use crate::infrastructure::metrics::{self, TickSource};

/// Buffer between the synthetic generator and the supervisor.
const SYNTHETIC_BUFFER: usize = 256;

// =============================================================================
// Producer State
// =============================================================================

/// Which producer currently feeds the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    /// Nothing is producing.
    #[default]
    Idle,
    /// Live exchange feed.
    Upstream,
    /// Fallback generator.
    Synthetic,
}

impl ProducerKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Upstream => "upstream",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Active producer, owned by the supervisor task.
#[derive(Debug, Default)]
pub enum ActiveProducer {
    /// No producer.
    #[default]
    Idle,
    /// Upstream connector is subscribed.
    Upstream,
    /// Synthetic generator task is running.
    Synthetic {
        /// Stops the generator.
        cancel: CancellationToken,
        /// Generator task.
        handle: JoinHandle<()>,
    },
}

impl ActiveProducer {
    /// Kind of this producer.
    #[must_use]
    pub const fn kind(&self) -> ProducerKind {
        match self {
            Self::Idle => ProducerKind::Idle,
            Self::Upstream => ProducerKind::Upstream,
            Self::Synthetic { .. } => ProducerKind::Synthetic,
        }
    }
}

// =============================================================================
// Shared Status
// =============================================================================

/// Point-in-time view of ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    /// Active producer.
    pub producer: ProducerKind,
    /// Whether the upstream connector is subscribed.
    pub upstream_connected: bool,
    /// Records upserted since start.
    pub records_written: u64,
    /// Tickers dropped by the normalizer.
    pub tickers_dropped: u64,
    /// Failed upserts.
    pub write_failures: u64,
    /// Time of the last successful upsert.
    pub last_write_at: Option<DateTime<Utc>>,
    /// Reason for the last disconnect or unreachable event.
    pub last_disconnect: Option<String>,
}

/// Ingestion status shared with the health server.
#[derive(Debug, Default)]
pub struct IngestionStatus {
    inner: RwLock<StatusSnapshot>,
}

impl IngestionStatus {
    /// Create an idle status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current status.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().clone()
    }

    /// Active producer.
    #[must_use]
    pub fn producer(&self) -> ProducerKind {
        self.inner.read().producer
    }

    fn set_producer(&self, producer: ProducerKind) {
        self.inner.write().producer = producer;
    }

    fn set_upstream(&self, connected: bool, reason: Option<String>) {
        let mut inner = self.inner.write();
        inner.upstream_connected = connected;
        if reason.is_some() {
            inner.last_disconnect = reason;
        }
    }

    fn record(&self, outcome: &WriteOutcome) {
        let mut inner = self.inner.write();
        match outcome {
            WriteOutcome::Written(_) => {
                inner.records_written += 1;
                inner.last_write_at = Some(Utc::now());
            }
            WriteOutcome::Dropped(_) => inner.tickers_dropped += 1,
            WriteOutcome::Failed(_) => inner.write_failures += 1,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Routes the active producer's tickers to the cache writer.
pub struct IngestionSupervisor {
    writer: CacheWriter,
    instruments: Vec<TrackedInstrument>,
    synthetic: Option<SyntheticConfig>,
    status: Arc<IngestionStatus>,
    cancel: CancellationToken,
    producer: ActiveProducer,
    synthetic_tx: mpsc::Sender<ProviderTicker>,
    synthetic_rx: mpsc::Receiver<ProviderTicker>,
}

impl std::fmt::Debug for IngestionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionSupervisor")
            .field("instruments", &self.instruments.len())
            .field("synthetic", &self.synthetic)
            .field("producer", &self.producer.kind())
            .finish_non_exhaustive()
    }
}

impl IngestionSupervisor {
    /// Create a supervisor. `synthetic = None` disables the fallback.
    #[must_use]
    pub fn new(
        writer: CacheWriter,
        instruments: Vec<TrackedInstrument>,
        synthetic: Option<SyntheticConfig>,
        status: Arc<IngestionStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let (synthetic_tx, synthetic_rx) = mpsc::channel(SYNTHETIC_BUFFER);
        Self {
            writer,
            instruments,
            synthetic,
            status,
            cancel,
            producer: ActiveProducer::Idle,
            synthetic_tx,
            synthetic_rx,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<IngestionStatus> {
        Arc::clone(&self.status)
    }

    /// Process feed events until cancelled or the connector goes away.
    pub async fn run(mut self, mut events: mpsc::Receiver<FeedEvent>) {
        tracing::info!(
            instruments = self.instruments.len(),
            synthetic_enabled = self.synthetic.is_some(),
            "Ingestion supervisor started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!("Feed connector closed its event channel");
                        break;
                    }
                },
                Some(ticker) = self.synthetic_rx.recv() => {
                    if matches!(self.producer, ActiveProducer::Synthetic { .. }) {
                        self.write(&ticker, TickSource::Synthetic).await;
                    } else {
                        tracing::trace!(inst_id = %ticker.inst_id, "Discarding late synthetic ticker");
                    }
                }
            }
        }

        self.switch_to(ActiveProducer::Idle).await;
        tracing::info!("Ingestion supervisor stopped");
    }

    async fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connecting { attempt } => {
                tracing::debug!(attempt, "Upstream connecting");
            }
            FeedEvent::Subscribed { instruments } => {
                tracing::info!(instruments, "Upstream subscribed");
                self.status.set_upstream(true, None);
                if !matches!(self.producer, ActiveProducer::Upstream) {
                    self.switch_to(ActiveProducer::Upstream).await;
                }
            }
            FeedEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Upstream disconnected");
                self.status.set_upstream(false, Some(reason));
                if matches!(self.producer, ActiveProducer::Upstream) {
                    self.switch_to(ActiveProducer::Idle).await;
                }
            }
            FeedEvent::Unreachable { reason } => {
                self.status.set_upstream(false, Some(reason.clone()));
                if matches!(self.producer, ActiveProducer::Synthetic { .. }) {
                    return;
                }
                match self.synthetic {
                    Some(config) => {
                        tracing::warn!(reason = %reason, "Upstream unreachable, using synthetic data");
                        let producer = self.spawn_synthetic(config);
                        self.switch_to(producer).await;
                    }
                    None => {
                        tracing::warn!(reason = %reason, "Upstream unreachable, synthetic fallback disabled");
                        self.switch_to(ActiveProducer::Idle).await;
                    }
                }
            }
            FeedEvent::Ticker(ticker) => {
                self.write(&ticker, TickSource::Upstream).await;
            }
        }
    }

    fn spawn_synthetic(&self, config: SyntheticConfig) -> ActiveProducer {
        let cancel = self.cancel.child_token();
        let generator = SyntheticGenerator::new(&self.instruments, config);
        let handle = tokio::spawn(generator.run(self.synthetic_tx.clone(), cancel.clone()));
        ActiveProducer::Synthetic { cancel, handle }
    }

    async fn switch_to(&mut self, next: ActiveProducer) {
        let previous = std::mem::replace(&mut self.producer, next);
        let (from, to) = (previous.kind(), self.producer.kind());

        if let ActiveProducer::Synthetic { cancel, handle } = previous {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Synthetic generator task failed");
            }
        }

        if from != to {
            metrics::record_producer_switch(to.as_str());
            self.status.set_producer(to);
            tracing::info!(from = from.as_str(), to = to.as_str(), "Active producer switched");
        }
    }

    async fn write(&self, ticker: &ProviderTicker, source: TickSource) {
        let outcome = self.writer.apply(ticker, source).await;
        self.status.record(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{ChangeFeed, MarketStore, StoreError};
    use crate::application::services::cache_writer::DEFAULT_WRITE_TIMEOUT;
    use crate::domain::market::{CanonicalRecord, default_instruments};
    use crate::infrastructure::store::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        status: Arc<IngestionStatus>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start(synthetic: Option<SyntheticConfig>) -> Harness {
        let store = Arc::new(InMemoryStore::default());
        let writer = CacheWriter::new(store.clone(), DEFAULT_WRITE_TIMEOUT);
        let status = Arc::new(IngestionStatus::new());
        let cancel = CancellationToken::new();
        let supervisor = IngestionSupervisor::new(
            writer,
            default_instruments(),
            synthetic,
            Arc::clone(&status),
            cancel.clone(),
        );
        let (events, rx) = mpsc::channel(16);
        let handle = tokio::spawn(supervisor.run(rx));
        Harness {
            store,
            status,
            events,
            cancel,
            handle,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn unreachable() -> FeedEvent {
        FeedEvent::Unreachable {
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_tickers_are_written() {
        let h = start(Some(SyntheticConfig::default()));
        h.events
            .send(FeedEvent::Subscribed { instruments: 12 })
            .await
            .unwrap();
        h.events
            .send(FeedEvent::Ticker(ProviderTicker::new("BTC-USDT-SWAP", "61234.50", "60000.00")))
            .await
            .unwrap();
        settle().await;

        let row = h.store.get("swap:BTC-USDT.P").unwrap();
        assert_eq!(row.last_price, Decimal::new(6_123_450, 2));
        assert_eq!(h.status.producer(), ProducerKind::Upstream);
        assert_eq!(h.status.snapshot().records_written, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_activates_synthetic_for_all_instruments() {
        let h = start(Some(SyntheticConfig::default()));
        h.events.send(unreachable()).await.unwrap();
        settle().await;

        assert_eq!(h.status.producer(), ProducerKind::Synthetic);
        assert_eq!(h.store.len(), default_instruments().len());

        let before = h.status.snapshot().records_written;
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        let after = h.status.snapshot().records_written;
        assert_eq!(after - before, default_instruments().len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_unreachable_keeps_single_generator() {
        let h = start(Some(SyntheticConfig::default()));
        h.events.send(unreachable()).await.unwrap();
        h.events.send(unreachable()).await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(
            h.status.snapshot().records_written,
            2 * default_instruments().len() as u64
        );
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_takes_over_from_synthetic() {
        let h = start(Some(SyntheticConfig::default()));
        h.events.send(unreachable()).await.unwrap();
        settle().await;
        assert_eq!(h.status.producer(), ProducerKind::Synthetic);

        h.events
            .send(FeedEvent::Subscribed { instruments: 12 })
            .await
            .unwrap();
        h.events
            .send(FeedEvent::Ticker(ProviderTicker::new("BTC-USDT-SWAP", "61234.50", "60000")))
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.status.producer(), ProducerKind::Upstream);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let row = h.store.get("swap:BTC-USDT.P").unwrap();
        assert_eq!(row.last_price, Decimal::new(6_123_450, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_returns_to_idle_without_synthetic() {
        let h = start(Some(SyntheticConfig::default()));
        h.events
            .send(FeedEvent::Subscribed { instruments: 12 })
            .await
            .unwrap();
        h.events
            .send(FeedEvent::Disconnected {
                reason: "closed by peer".to_string(),
            })
            .await
            .unwrap();
        settle().await;

        let status = h.status.snapshot();
        assert_eq!(status.producer, ProducerKind::Idle);
        assert!(!status.upstream_connected);
        assert_eq!(status.last_disconnect.as_deref(), Some("closed by peer"));
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_fallback_stays_idle() {
        let h = start(None);
        h.events.send(unreachable()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.status.producer(), ProducerKind::Idle);
        assert!(h.store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_ticker_counts_as_dropped() {
        let h = start(None);
        h.events
            .send(FeedEvent::Ticker(ProviderTicker::new("BTC-USDT", "", "1")))
            .await
            .unwrap();
        settle().await;

        assert_eq!(h.status.snapshot().tickers_dropped, 1);
        assert_eq!(h.store.len(), 0);
    }

    /// Store whose writes take a full second each.
    struct SlowStore(InMemoryStore);

    #[async_trait::async_trait]
    impl MarketStore for SlowStore {
        async fn upsert(&self, record: CanonicalRecord) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.0.upsert(record).await
        }

        async fn snapshot(&self) -> Result<Vec<CanonicalRecord>, StoreError> {
            self.0.snapshot().await
        }

        async fn subscribe(&self) -> Result<ChangeFeed, StoreError> {
            self.0.subscribe().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_does_not_block_upstream_takeover_or_shutdown() {
        let store = Arc::new(SlowStore(InMemoryStore::default()));
        let writer = CacheWriter::new(store, DEFAULT_WRITE_TIMEOUT);
        let status = Arc::new(IngestionStatus::new());
        let cancel = CancellationToken::new();
        let supervisor = IngestionSupervisor::new(
            writer,
            default_instruments(),
            Some(SyntheticConfig::default()),
            Arc::clone(&status),
            cancel.clone(),
        );
        let (events, rx) = mpsc::channel(16);
        let handle = tokio::spawn(supervisor.run(rx));

        events.send(unreachable()).await.unwrap();
        // Writes lag far behind the cadence, so the synthetic buffer fills.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(status.producer(), ProducerKind::Synthetic);

        events
            .send(FeedEvent::Subscribed { instruments: 12 })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status.producer(), ProducerKind::Upstream);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert_eq!(status.producer(), ProducerKind::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_supervisor_and_generator() {
        let h = start(Some(SyntheticConfig::default()));
        h.events.send(unreachable()).await.unwrap();
        settle().await;

        h.cancel.cancel();
        h.handle.await.unwrap();
        assert_eq!(h.status.producer(), ProducerKind::Idle);
    }
}
