//! Flash Direction
//!
//! Subscriber-side view of a canonical record carrying a transient
//! up/down marker for the most recent price move.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::CanonicalRecord;

/// Direction of the latest price change for an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashDirection {
    /// No recent move, or the flash has expired.
    #[default]
    None,
    /// Price rose.
    Up,
    /// Price fell.
    Down,
}

impl FlashDirection {
    /// Compare a new price against the previously held one.
    ///
    /// Without a previous price there is nothing to compare, so no flash.
    #[must_use]
    pub fn between(previous: Option<Decimal>, next: Decimal) -> Self {
        match previous {
            Some(prev) if next > prev => Self::Up,
            Some(prev) if next < prev => Self::Down,
            _ => Self::None,
        }
    }

    /// Whether a flash is showing.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A canonical record as held by a change subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMarketEntry {
    /// Latest record for this id.
    #[serde(flatten)]
    pub record: CanonicalRecord,
    /// Transient direction marker.
    pub flash: FlashDirection,
}

impl ClientMarketEntry {
    /// Entry loaded from a snapshot; never flashes.
    #[must_use]
    pub const fn hydrated(record: CanonicalRecord) -> Self {
        Self {
            record,
            flash: FlashDirection::None,
        }
    }

    /// Entry for a live update, flashing relative to the held entry (if any).
    #[must_use]
    pub fn updated(previous: Option<&Self>, record: CanonicalRecord) -> Self {
        let flash = FlashDirection::between(previous.map(|p| p.record.last_price), record.last_price);
        Self { record, flash }
    }

    /// Canonical id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }
}
