//! Market Store Adapters
//!
//! Implementations of the [`MarketStore`](crate::application::ports::MarketStore)
//! port. The production cache lives outside this process; [`InMemoryStore`]
//! provides the same upsert, snapshot and change-feed semantics in memory.

mod memory;

pub use memory::{DEFAULT_CHANGE_FEED_CAPACITY, InMemoryStore, SharedStore};
