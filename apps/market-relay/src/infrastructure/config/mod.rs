//! Configuration Module
//!
//! Environment-driven configuration for the relay and its conversions into
//! component configurations.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, RelayConfig, ServerSettings, StoreSettings, SubscriberSettings,
    SyntheticSettings, parse_instruments,
};
