//! Synthetic Generator
//!
//! Fallback producer used while the upstream feed is categorically
//! unreachable. Every cadence it emits one ticker per tracked instrument in the
//! upstream wire shape, so synthetic prices flow through the same normalizer
//! and cache writer as real ones.
//!
//! # Price Walk
//!
//! ```text
//! next = prev + U(-j, +j) * reference      (j = 0.25% by default)
//! ```
//!
//! A walk that reaches zero or below restarts from the reference price. The
//! 24h open of every synthetic ticker is the reference price.

use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::market::{ProviderTicker, TrackedInstrument};

/// Default emission cadence.
pub const DEFAULT_CADENCE: Duration = Duration::from_secs(2);

/// Default jitter bound in parts per million of the reference (0.25%).
pub const DEFAULT_JITTER_PPM: u32 = 2_500;

/// Decimal places kept on synthetic prices.
const PRICE_SCALE: u32 = 8;

/// Synthetic generator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticConfig {
    /// Time between ticker batches.
    pub cadence: Duration,
    /// Maximum step per tick, in parts per million of the reference price.
    pub jitter_ppm: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
            jitter_ppm: DEFAULT_JITTER_PPM,
        }
    }
}

#[derive(Debug, Clone)]
struct PriceWalk {
    inst_id: String,
    reference: Decimal,
    price: Decimal,
}

impl PriceWalk {
    fn step<R: Rng + ?Sized>(&mut self, rng: &mut R, jitter_ppm: i64) -> Decimal {
        let ppm = if jitter_ppm > 0 {
            rng.random_range(-jitter_ppm..=jitter_ppm)
        } else {
            0
        };
        let delta = self.reference * Decimal::new(ppm, 6);
        let next = (self.price + delta).round_dp(PRICE_SCALE).normalize();

        self.price = if next > Decimal::ZERO { next } else { self.reference };
        self.price
    }
}

/// Random-walk ticker source over a fixed instrument list.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    config: SyntheticConfig,
    walks: Vec<PriceWalk>,
}

impl SyntheticGenerator {
    /// Create a generator starting every instrument at its reference price.
    #[must_use]
    pub fn new(instruments: &[TrackedInstrument], config: SyntheticConfig) -> Self {
        let walks = instruments
            .iter()
            .map(|i| PriceWalk {
                inst_id: i.inst_id.clone(),
                reference: i.reference_price,
                price: i.reference_price,
            })
            .collect();
        Self { config, walks }
    }

    /// Number of instruments emitted per batch.
    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.walks.len()
    }

    /// Advance every walk one step and return the resulting tickers.
    pub fn next_ticks<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<ProviderTicker> {
        let now_ms = Utc::now().timestamp_millis();
        let jitter = i64::from(self.config.jitter_ppm);

        self.walks
            .iter_mut()
            .map(|walk| {
                let price = walk.step(rng, jitter);
                ProviderTicker::new(walk.inst_id.clone(), price.to_string(), walk.reference.to_string())
                    .with_timestamp_ms(now_ms)
            })
            .collect()
    }

    /// Emit a batch every cadence until cancelled or the receiver is dropped.
    ///
    /// The first batch is emitted immediately.
    pub async fn run(mut self, tx: mpsc::Sender<ProviderTicker>, cancel: CancellationToken) {
        let mut rng = StdRng::from_os_rng();
        let mut interval = tokio::time::interval(self.config.cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            instruments = self.walks.len(),
            cadence_ms = self.config.cadence.as_millis() as u64,
            "Synthetic generator started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for ticker in self.next_ticks(&mut rng) {
                        // A full buffer must not outlive cancellation.
                        tokio::select! {
                            () = cancel.cancelled() => {
                                tracing::info!("Synthetic generator stopped");
                                return;
                            }
                            sent = tx.send(ticker) => if sent.is_err() {
                                tracing::debug!("Synthetic receiver dropped");
                                return;
                            },
                        }
                    }
                }
            }
        }

        tracing::info!("Synthetic generator stopped");
    }
}
