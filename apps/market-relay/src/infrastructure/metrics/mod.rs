//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: ticks received per source, normalization failures
//! - **Cache**: records written, write failures, write latency
//! - **Connection**: connector state, reconnect attempts, producer switches
//! - **Subscribers**: entries applied from snapshots and live changes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `None` when a recorder is already installed by someone else.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "market_relay_ticks_received_total",
        "Tickers received, by producing source"
    );
    describe_counter!(
        "market_relay_normalize_failures_total",
        "Tickers dropped because they could not be normalized"
    );
    describe_counter!(
        "market_relay_records_written_total",
        "Canonical records upserted into the market cache"
    );
    describe_counter!(
        "market_relay_write_failures_total",
        "Market cache upserts that failed or timed out"
    );
    describe_histogram!(
        "market_relay_write_seconds",
        "Time spent upserting a single record"
    );
    describe_gauge!(
        "market_relay_connector_state",
        "Upstream connector state (0=disconnected, 1=connecting, 2=subscribed)"
    );
    describe_counter!(
        "market_relay_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_counter!(
        "market_relay_producer_switches_total",
        "Active producer transitions, by target producer"
    );
    describe_counter!(
        "market_relay_subscriber_updates_total",
        "Entries applied by change subscribers, by origin"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Which producer a ticker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    /// Live exchange feed.
    Upstream,
    /// Fallback generator.
    Synthetic,
}

impl TickSource {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Synthetic => "synthetic",
        }
    }
}

/// How a subscriber entry was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Snapshot hydration.
    Snapshot,
    /// Live change notification.
    Live,
}

impl UpdateOrigin {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Live => "live",
        }
    }
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a ticker received from a producer.
pub fn record_tick_received(source: TickSource) {
    counter!("market_relay_ticks_received_total", "source" => source.as_str()).increment(1);
}

/// Record a ticker dropped by the normalizer.
pub fn record_normalize_failure() {
    counter!("market_relay_normalize_failures_total").increment(1);
}

/// Record a successful upsert.
pub fn record_write(asset_class: &'static str, duration: Duration) {
    counter!("market_relay_records_written_total", "asset_class" => asset_class).increment(1);
    histogram!("market_relay_write_seconds").record(duration.as_secs_f64());
}

/// Record a failed upsert.
pub fn record_write_failure(reason: &'static str) {
    counter!("market_relay_write_failures_total", "reason" => reason).increment(1);
}

/// Update the connector state gauge.
pub fn set_connector_state(value: f64) {
    gauge!("market_relay_connector_state").set(value);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("market_relay_reconnects_total").increment(1);
}

/// Record a producer switch.
pub fn record_producer_switch(to: &'static str) {
    counter!("market_relay_producer_switches_total", "to" => to).increment(1);
}

/// Record an entry applied by a change subscriber.
pub fn record_subscriber_update(origin: UpdateOrigin) {
    counter!("market_relay_subscriber_updates_total", "origin" => origin.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values() {
        assert_eq!(TickSource::Upstream.as_str(), "upstream");
        assert_eq!(TickSource::Synthetic.as_str(), "synthetic");
        assert_eq!(UpdateOrigin::Snapshot.as_str(), "snapshot");
        assert_eq!(UpdateOrigin::Live.as_str(), "live");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received(TickSource::Synthetic);
        record_write("spot", Duration::from_millis(3));
        record_write_failure("timeout");
        set_connector_state(2.0);
    }
}
