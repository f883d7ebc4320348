//! Locally Synthesized Candles
//!
//! Builds fixed-interval OHLC candles from successive latest prices for
//! chart consumers. Nothing here is persisted.
//!
//! A new bucket opens at the previous candle's close, which is not
//! necessarily the true first trade of that interval. The very first candle
//! of a series opens at the first observed price.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Default candle width.
pub const DEFAULT_INTERVAL: TimeDelta = TimeDelta::minutes(1);

/// Default number of candles retained per series.
pub const DEFAULT_CAPACITY: usize = 100;

/// One OHLC candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Inclusive start of the bucket.
    pub start: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest price seen in the bucket.
    pub high: Decimal,
    /// Lowest price seen in the bucket.
    pub low: Decimal,
    /// Latest price in the bucket.
    pub close: Decimal,
}

impl Candle {
    fn opening(start: DateTime<Utc>, open: Decimal, price: Decimal) -> Self {
        Self {
            start,
            open,
            high: open.max(price),
            low: open.min(price),
            close: price,
        }
    }

    fn extend(&mut self, price: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Rolling candle series for a single instrument.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    interval: TimeDelta,
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl Default for CandleSeries {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_CAPACITY)
    }
}

impl CandleSeries {
    /// Create a series with the given bucket width and retention.
    #[must_use]
    pub fn new(interval: TimeDelta, capacity: usize) -> Self {
        Self {
            interval: if interval > TimeDelta::zero() { interval } else { DEFAULT_INTERVAL },
            capacity: capacity.max(1),
            candles: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Fold a price observed at `at` into the series and return the affected candle.
    ///
    /// Prices older than the current bucket fold into the current candle.
    pub fn update(&mut self, price: Decimal, at: DateTime<Utc>) -> Candle {
        let start = self.bucket_start(at);

        if let Some(last) = self.candles.back_mut()
            && start <= last.start
        {
            last.extend(price);
            return *last;
        }

        let open = self.candles.back().map_or(price, |c| c.close);
        let candle = Candle::opening(start, open, price);

        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
        candle
    }

    /// Most recent candle.
    #[must_use]
    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Candles from oldest to newest.
    pub fn candles(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Number of retained candles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.interval.num_milliseconds().max(1);
        let millis = at.timestamp_millis();
        let floored = millis - millis.rem_euclid(width);
        DateTime::from_timestamp_millis(floored).unwrap_or(at)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, min, sec).unwrap()
    }

    fn d(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    #[test]
    fn first_candle_opens_at_first_price() {
        let mut series = CandleSeries::default();
        let c = series.update(d(100), at(0, 10));
        assert_eq!(c.start, at(0, 0));
        assert_eq!((c.open, c.high, c.low, c.close), (d(100), d(100), d(100), d(100)));
    }

    #[test]
    fn same_bucket_extends_high_low_close() {
        let mut series = CandleSeries::default();
        series.update(d(100), at(0, 1));
        series.update(d(105), at(0, 20));
        let c = series.update(d(97), at(0, 59));
        assert_eq!(series.len(), 1);
        assert_eq!((c.open, c.high, c.low, c.close), (d(100), d(105), d(97), d(97)));
    }

    #[test]
    fn new_bucket_opens_at_previous_close() {
        let mut series = CandleSeries::default();
        series.update(d(100), at(0, 1));
        series.update(d(102), at(0, 30));
        let c = series.update(d(110), at(1, 5));
        assert_eq!(series.len(), 2);
        assert_eq!(c.start, at(1, 0));
        assert_eq!(c.open, d(102));
        assert_eq!(c.low, d(102));
        assert_eq!(c.high, d(110));
    }

    #[test]
    fn late_price_folds_into_current_candle() {
        let mut series = CandleSeries::default();
        series.update(d(100), at(5, 0));
        let c = series.update(d(90), at(4, 0));
        assert_eq!(series.len(), 1);
        assert_eq!(c.low, d(90));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut series = CandleSeries::new(TimeDelta::minutes(1), 2);
        series.update(d(1), at(0, 0));
        series.update(d(2), at(1, 0));
        series.update(d(3), at(2, 0));
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles().next().unwrap().start, at(1, 0));
    }
}
