//! Reconnection Policy
//!
//! Delay schedule between upstream connection attempts. The default is a
//! fixed delay; exponential backoff with jitter and a cap is available for
//! deployments that prefer it.

use std::time::Duration;

use rand::Rng;

/// Default delay between attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How the delay grows across consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectStrategy {
    /// Same delay for every attempt.
    Fixed,
    /// Delay multiplied on each attempt, randomized by ±`jitter_factor`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
        /// Jitter as a fraction of the delay (0.1 = ±10%).
        jitter_factor: f64,
    },
}

impl ReconnectStrategy {
    /// Exponential backoff doubling each attempt with ±10% jitter.
    #[must_use]
    pub const fn exponential() -> Self {
        Self::Exponential {
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for exponential delays.
    pub max_delay: Duration,
    /// Delay schedule.
    pub strategy: ReconnectStrategy,
    /// Maximum consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: ReconnectStrategy::Fixed,
            max_attempts: 0,
        }
    }
}

/// Stateful delay schedule; reset after every successful subscribe.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once max attempts are used up.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        match self.config.strategy {
            ReconnectStrategy::Fixed => Some(self.config.initial_delay),
            ReconnectStrategy::Exponential {
                multiplier,
                jitter_factor,
            } => {
                let delay = apply_jitter(self.current_delay, jitter_factor);
                self.current_delay = scale(self.current_delay, multiplier).min(self.config.max_delay);
                Some(delay)
            }
        }
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }
}

fn scale(duration: Duration, multiplier: f64) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let scaled = (duration.as_millis() as f64 * multiplier).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let millis = scaled.min(u64::MAX as f64) as u64;
    Duration::from_millis(millis)
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    #[allow(clippy::cast_precision_loss)]
    let base_millis = duration.as_millis() as f64;
    let jitter_range = base_millis * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (base_millis + jitter).max(1.0) as u64;
    Duration::from_millis(millis)
}
