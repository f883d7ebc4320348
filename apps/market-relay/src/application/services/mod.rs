//! Application Services
//!
//! - [`CacheWriter`]: normalize and upsert into the market store
//! - [`SyntheticGenerator`]: fallback ticker source during upstream outages
//! - [`IngestionSupervisor`]: owns the active producer and routes its output
//! - [`ChangeSubscriber`]: consumer-side market map with flash markers

mod cache_writer;
mod change_subscriber;
mod ingestion;
mod synthetic;

pub use cache_writer::{CacheWriter, DEFAULT_WRITE_TIMEOUT, WriteOutcome};
pub use change_subscriber::{
    ChangeSubscriber, DEFAULT_FLASH_CLEAR, SubscriberConfig, SubscriberError,
};
pub use ingestion::{
    ActiveProducer, IngestionStatus, IngestionSupervisor, ProducerKind, StatusSnapshot,
};
pub use synthetic::{DEFAULT_CADENCE, DEFAULT_JITTER_PPM, SyntheticConfig, SyntheticGenerator};
