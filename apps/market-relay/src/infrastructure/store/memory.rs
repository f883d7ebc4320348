//! In-Memory Market Store
//!
//! Keyed map plus a tokio broadcast channel for change notifications. The
//! map write and the notification happen under the same lock, so every
//! subscriber sees changes in write order.
//!
//! A subscriber that falls more than the channel capacity behind receives
//! [`StoreError::Lagged`] and is expected to reload the snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::application::ports::{ChangeEvent, ChangeFeed, ChangeKind, MarketStore, StoreError};
use crate::domain::market::CanonicalRecord;

/// Default change-feed buffer per subscriber.
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1_024;

/// Shared store reference.
pub type SharedStore = Arc<InMemoryStore>;

/// Process-local market cache.
#[derive(Debug)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<String, CanonicalRecord>>,
    changes_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_FEED_CAPACITY)
    }
}

impl InMemoryStore {
    /// Create an empty store whose change feed buffers `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            changes_tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Current row for an id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<CanonicalRecord> {
        self.rows.read().get(id).cloned()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of live change-feed subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.changes_tx.receiver_count()
    }
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn upsert(&self, record: CanonicalRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        let kind = match rows.insert(record.id.clone(), record.clone()) {
            Some(_) => ChangeKind::Update,
            None => ChangeKind::Insert,
        };
        // No receivers is not an error.
        let _ = self.changes_tx.send(ChangeEvent { kind, record });
        drop(rows);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<CanonicalRecord>, StoreError> {
        let mut records: Vec<_> = self.rows.read().values().cloned().collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn subscribe(&self) -> Result<ChangeFeed, StoreError> {
        let feed = BroadcastStream::new(self.changes_tx.subscribe()).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| StoreError::Lagged(skipped))
        });
        Ok(feed.boxed())
    }
}
