//! Market Record Types
//!
//! Canonical market records shared by ingestion and every downstream
//! consumer, plus the upstream ticker shape they are derived from.
//!
//! # Keys
//!
//! Every record is keyed by a canonical id of the form
//! `<asset_class>:<symbol-with-dashes>` (e.g. `swap:BTC-USDT.P`). The id is the
//! single join key between the cache writer and subscribers.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Asset Class
// =============================================================================

/// Market segment of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Spot pair (e.g. `BTC-USDT`).
    Spot,
    /// Perpetual swap (e.g. `BTC-USDT-SWAP`).
    Swap,
    /// Option contract (e.g. `BTC-USD-261231-65000-C`).
    Option,
}

impl AssetClass {
    /// Get all asset classes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Spot, Self::Swap, Self::Option]
    }

    /// Get the id prefix for this class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Swap => "swap",
            Self::Option => "option",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Canonical Record
// =============================================================================

/// The unit persisted in the market cache and propagated to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Canonical key, `<asset_class>:<symbol-with-dashes>`.
    pub id: String,
    /// Market segment.
    pub asset_class: AssetClass,
    /// Human display symbol (`BTC/USDT`, `BTC/USDT.P`).
    pub symbol: String,
    /// Latest trade price, always positive.
    pub last_price: Decimal,
    /// Signed percentage change against the 24h open.
    pub change_24h: Decimal,
    /// Record freshness.
    pub updated_at: DateTime<Utc>,
}

/// Build a canonical id from an asset class and a dashed symbol.
#[must_use]
pub fn canonical_id(asset_class: AssetClass, symbol: &str) -> String {
    format!("{}:{symbol}", asset_class.as_str())
}

// =============================================================================
// Upstream Ticker
// =============================================================================

/// A single upstream ticker entry as delivered by the exchange.
///
/// Price fields are kept as raw text so that validation happens in one place
/// (the normalizer). Numeric JSON values are accepted and stringified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTicker {
    /// Upstream instrument identifier (e.g. `BTC-USDT-SWAP`).
    #[serde(rename = "instId", default)]
    pub inst_id: String,
    /// Last traded price.
    #[serde(default, deserialize_with = "string_or_number")]
    pub last: Option<String>,
    /// Price 24 hours ago.
    #[serde(rename = "open24h", default, deserialize_with = "string_or_number")]
    pub open_24h: Option<String>,
    /// Exchange timestamp in Unix milliseconds.
    #[serde(default, deserialize_with = "string_or_number")]
    pub ts: Option<String>,
}

impl ProviderTicker {
    /// Create a ticker with last and 24h open prices.
    #[must_use]
    pub fn new(inst_id: impl Into<String>, last: impl Into<String>, open_24h: impl Into<String>) -> Self {
        Self {
            inst_id: inst_id.into(),
            last: Some(last.into()),
            open_24h: Some(open_24h.into()),
            ts: None,
        }
    }

    /// Attach an exchange timestamp in Unix milliseconds.
    #[must_use]
    pub fn with_timestamp_ms(mut self, ts: i64) -> Self {
        self.ts = Some(ts.to_string());
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// =============================================================================
// Tracked Instruments
// =============================================================================

/// An instrument the relay subscribes to, with the reference price used by
/// the synthetic generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedInstrument {
    /// Upstream instrument identifier.
    pub inst_id: String,
    /// Reference price for synthetic ticks.
    pub reference_price: Decimal,
}

impl TrackedInstrument {
    /// Create a tracked instrument.
    #[must_use]
    pub fn new(inst_id: impl Into<String>, reference_price: Decimal) -> Self {
        Self {
            inst_id: inst_id.into(),
            reference_price,
        }
    }
}

/// The built-in instrument list: spot pairs, perpetual swaps and options.
#[must_use]
pub fn default_instruments() -> Vec<TrackedInstrument> {
    [
        ("BTC-USDT", Decimal::new(60_000, 0)),
        ("ETH-USDT", Decimal::new(3_000, 0)),
        ("LTC-USDT", Decimal::new(85, 0)),
        ("DOT-USDT", Decimal::new(7, 0)),
        ("FIL-USDT", Decimal::new(5, 0)),
        ("VET-USDT", Decimal::new(3, 2)),
        ("BTC-USDT-SWAP", Decimal::new(60_000, 0)),
        ("ETH-USDT-SWAP", Decimal::new(3_000, 0)),
        ("SOL-USDT-SWAP", Decimal::new(150, 0)),
        ("BTC-USD-261231-65000-C", Decimal::new(1_000, 0)),
        ("BTC-USD-261231-60000-P", Decimal::new(1_000, 0)),
        ("ETH-USD-261231-3000-C", Decimal::new(150, 0)),
    ]
    .into_iter()
    .map(|(inst_id, price)| TrackedInstrument::new(inst_id, price))
    .collect()
}
