//! Heartbeat
//!
//! OKX closes idle public connections after 30 seconds, so the connector
//! sends a text `ping` on a fixed interval and expects some inbound frame
//! (normally a text `pong`) before the pong timeout expires.
//!
//! The heartbeat lives inside the connection's select loop and is dropped
//! with the connection, so no timer outlives its socket.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Text frame sent to keep the connection alive.
pub const PING: &str = "ping";

/// Text frame returned by the exchange.
pub const PONG: &str = "pong";

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

/// What the connection loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// Nothing was received within the pong timeout.
    TimedOut,
}

/// Per-connection heartbeat timer.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Interval,
    awaiting_since: Option<Instant>,
}

impl Heartbeat {
    /// Start a heartbeat; the first ping is due one interval from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let mut interval =
            tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            config,
            interval,
            awaiting_since: None,
        }
    }

    /// Record inbound traffic; any frame proves the connection is alive.
    pub const fn record_inbound(&mut self) {
        self.awaiting_since = None;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_awaiting_reply(&self) -> bool {
        self.awaiting_since.is_some()
    }

    /// Wait for the next heartbeat action. Cancel safe.
    pub async fn tick(&mut self) -> HeartbeatAction {
        let deadline = self.awaiting_since.map(|sent| sent + self.config.pong_timeout);

        tokio::select! {
            _ = self.interval.tick() => {
                self.awaiting_since.get_or_insert_with(Instant::now);
                HeartbeatAction::SendPing
            }
            () = sleep_until(deadline) => HeartbeatAction::TimedOut,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
