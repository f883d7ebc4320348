//! Relay Configuration Settings
//!
//! Configuration types for the market relay, loaded from environment variables.
//! Unset or unparsable numeric values fall back to their defaults; the
//! instrument list and proxy URL are validated and reject bad input.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{
    DEFAULT_CADENCE, DEFAULT_FLASH_CLEAR, DEFAULT_JITTER_PPM, DEFAULT_WRITE_TIMEOUT,
    SubscriberConfig, SyntheticConfig,
};
use crate::domain::market::{TrackedInstrument, default_instruments};
use crate::infrastructure::okx::{
    DEFAULT_CONNECT_TIMEOUT, FeedConnectorConfig, HeartbeatConfig, HttpProxy, OKX_PUBLIC_WS_URL,
    ProxyError, ReconnectConfig, ReconnectStrategy,
};
use crate::infrastructure::store::DEFAULT_CHANGE_FEED_CAPACITY;

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket URL of the public endpoint.
    pub url: String,
    /// Instruments to subscribe to, with synthetic reference prices.
    pub instruments: Vec<TrackedInstrument>,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Delay before reconnecting (initial delay for exponential backoff).
    pub reconnect_delay: Duration,
    /// Use exponential backoff instead of a fixed delay.
    pub exponential_backoff: bool,
    /// Upper bound for exponential delays.
    pub reconnect_delay_max: Duration,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Forward proxy from `HTTPS_PROXY` / `HTTP_PROXY`.
    pub proxy: Option<HttpProxy>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        let heartbeat = HeartbeatConfig::default();
        let reconnect = ReconnectConfig::default();
        Self {
            url: OKX_PUBLIC_WS_URL.to_string(),
            instruments: default_instruments(),
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.pong_timeout,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: reconnect.initial_delay,
            exponential_backoff: false,
            reconnect_delay_max: reconnect.max_delay,
            max_reconnect_attempts: reconnect.max_attempts,
            proxy: None,
        }
    }
}

impl FeedSettings {
    /// Connector configuration for these settings.
    #[must_use]
    pub fn connector_config(&self) -> FeedConnectorConfig {
        let strategy = if self.exponential_backoff {
            ReconnectStrategy::exponential()
        } else {
            ReconnectStrategy::Fixed
        };

        FeedConnectorConfig {
            url: self.url.clone(),
            instruments: self.instruments.iter().map(|i| i.inst_id.clone()).collect(),
            connect_timeout: self.connect_timeout,
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect_delay,
                max_delay: self.reconnect_delay_max,
                strategy,
                max_attempts: self.max_reconnect_attempts,
            },
            heartbeat: HeartbeatConfig {
                ping_interval: self.heartbeat_interval,
                pong_timeout: self.heartbeat_timeout,
            },
            proxy: self.proxy.clone(),
        }
    }
}

/// Synthetic fallback settings.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSettings {
    /// Start the generator when the upstream is unreachable.
    pub enabled: bool,
    /// Time between ticker batches.
    pub cadence: Duration,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence: DEFAULT_CADENCE,
        }
    }
}

impl SyntheticSettings {
    /// Generator configuration, or `None` when the fallback is disabled.
    #[must_use]
    pub const fn generator_config(&self) -> Option<SyntheticConfig> {
        if self.enabled {
            Some(SyntheticConfig {
                cadence: self.cadence,
                jitter_ppm: DEFAULT_JITTER_PPM,
            })
        } else {
            None
        }
    }
}

/// Market cache settings.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    /// Bound on a single upsert.
    pub write_timeout: Duration,
    /// Change feed buffer per subscriber.
    pub change_feed_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

/// Change subscriber settings.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberSettings {
    /// Lifetime of a flash marker.
    pub flash_clear: Duration,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            flash_clear: DEFAULT_FLASH_CLEAR,
        }
    }
}

impl SubscriberSettings {
    /// Subscriber configuration with default candle settings.
    #[must_use]
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            flash_clear: self.flash_clear,
            ..SubscriberConfig::default()
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Synthetic fallback settings.
    pub synthetic: SyntheticSettings,
    /// Market cache settings.
    pub store: StoreSettings,
    /// Change subscriber settings.
    pub subscriber: SubscriberSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrument list or proxy URL is invalid, or if
    /// a duration or buffer size is set to zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&Env::process())
    }

    fn from_source(env: &Env) -> Result<Self, ConfigError> {
        let feed_defaults = FeedSettings::default();

        let instruments = match env.get("MARKET_RELAY_INSTRUMENTS") {
            Some(list) => parse_instruments(&list)?,
            None => feed_defaults.instruments,
        };

        let exponential_backoff = match env.get("MARKET_RELAY_RECONNECT_BACKOFF") {
            Some(value) => parse_backoff(&value)?,
            None => feed_defaults.exponential_backoff,
        };

        let proxy = env.proxy()?;

        let feed = FeedSettings {
            url: env.get("OKX_WS_URL").unwrap_or(feed_defaults.url),
            instruments,
            heartbeat_interval: env.duration_secs(
                "MARKET_RELAY_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: env.duration_secs(
                "MARKET_RELAY_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            )?,
            connect_timeout: env.duration_secs(
                "MARKET_RELAY_CONNECT_TIMEOUT_SECS",
                feed_defaults.connect_timeout,
            )?,
            reconnect_delay: env.duration_millis(
                "MARKET_RELAY_RECONNECT_DELAY_MS",
                feed_defaults.reconnect_delay,
            )?,
            exponential_backoff,
            reconnect_delay_max: env.duration_secs(
                "MARKET_RELAY_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            )?,
            max_reconnect_attempts: env.parse(
                "MARKET_RELAY_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            proxy,
        };

        let synthetic = SyntheticSettings {
            enabled: env.flag(
                "MARKET_RELAY_SYNTHETIC_ENABLED",
                SyntheticSettings::default().enabled,
            ),
            cadence: env.duration_millis(
                "MARKET_RELAY_SYNTHETIC_CADENCE_MS",
                SyntheticSettings::default().cadence,
            )?,
        };

        let store = StoreSettings {
            write_timeout: env.duration_millis(
                "MARKET_RELAY_WRITE_TIMEOUT_MS",
                StoreSettings::default().write_timeout,
            )?,
            change_feed_capacity: env.positive(
                "MARKET_RELAY_CHANGE_FEED_CAPACITY",
                StoreSettings::default().change_feed_capacity,
            )?,
        };

        let subscriber = SubscriberSettings {
            flash_clear: env.duration_millis(
                "MARKET_RELAY_FLASH_CLEAR_MS",
                SubscriberSettings::default().flash_clear,
            )?,
        };

        let server = ServerSettings {
            health_port: env.parse(
                "MARKET_RELAY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            feed,
            synthetic,
            store,
            subscriber,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Instrument list entry could not be parsed.
    #[error("invalid instrument entry {entry:?}: {reason}")]
    InvalidInstrument {
        /// Offending entry.
        entry: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Environment variable holds an unsupported value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// Proxy URL could not be parsed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Parse an instrument list of the form `BTC-USDT=60000,ETH-USDT-SWAP=3000`.
///
/// Every entry needs a positive reference price; duplicates are rejected.
///
/// # Errors
///
/// Returns an error for empty lists, malformed entries and duplicates.
pub fn parse_instruments(list: &str) -> Result<Vec<TrackedInstrument>, ConfigError> {
    let mut instruments: Vec<TrackedInstrument> = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = |reason: &str| ConfigError::InvalidInstrument {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let (inst_id, price) = entry
            .split_once('=')
            .ok_or_else(|| invalid("expected INSTRUMENT=PRICE"))?;
        let inst_id = inst_id.trim().to_uppercase();
        if inst_id.is_empty() {
            return Err(invalid("missing instrument id"));
        }

        let price = Decimal::from_str(price.trim()).map_err(|_| invalid("price is not a number"))?;
        if price <= Decimal::ZERO {
            return Err(invalid("price must be positive"));
        }

        if instruments.iter().any(|i| i.inst_id == inst_id) {
            return Err(invalid("duplicate instrument"));
        }
        instruments.push(TrackedInstrument::new(inst_id, price));
    }

    if instruments.is_empty() {
        return Err(ConfigError::EmptyValue("MARKET_RELAY_INSTRUMENTS".to_string()));
    }
    Ok(instruments)
}

fn parse_backoff(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "fixed" => Ok(false),
        "exponential" => Ok(true),
        _ => Err(ConfigError::InvalidValue {
            key: "MARKET_RELAY_RECONNECT_BACKOFF".to_string(),
            value: value.to_string(),
        }),
    }
}

/// Variable lookup, so parsing can be exercised without touching the process
/// environment.
struct Env {
    lookup: Box<dyn Fn(&str) -> Option<String>>,
}

impl Env {
    fn process() -> Self {
        Self {
            lookup: Box::new(|key| std::env::var(key).ok()),
        }
    }

    #[cfg(test)]
    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            lookup: Box::new(move |key| vars.get(key).cloned()),
        }
    }

    /// Non-empty, trimmed value.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// Parsed value, rejecting zero. Unparsable values fall back to `default`.
    fn positive<T: FromStr + Default + PartialEq>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.parse::<T>() {
            Ok(value) if value == T::default() => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
            Ok(value) => Ok(value),
            Err(_) => Ok(default),
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive(key, default.as_secs()).map(Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.positive(key, default_ms).map(Duration::from_millis)
    }

    /// Proxy from the first set variable. A proxy this relay cannot speak is
    /// skipped with a warning and the feed connects directly.
    fn proxy(&self) -> Result<Option<HttpProxy>, ProxyError> {
        let Some((var, url)) = crate::infrastructure::okx::proxy::PROXY_ENV_VARS
            .iter()
            .find_map(|var| self.get(var).map(|url| (*var, url)))
        else {
            return Ok(None);
        };

        match HttpProxy::parse(&url) {
            Ok(proxy) => Ok(Some(proxy)),
            Err(e @ ProxyError::UnsupportedScheme { .. }) => {
                tracing::warn!(var, error = %e, "Ignoring proxy, connecting directly");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
