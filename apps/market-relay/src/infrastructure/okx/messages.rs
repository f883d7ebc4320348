//! OKX v5 Public WebSocket Messages
//!
//! # Outbound
//!
//! ```json
//! {"op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}
//! ```
//!
//! # Inbound
//!
//! - Events: `{"event":"subscribe","arg":{...},"connId":"..."}` or
//!   `{"event":"error","code":"60012","msg":"...","connId":"..."}`
//! - Pushes: `{"arg":{"channel":"tickers","instId":"..."},"data":[{...}]}`
//! - Heartbeat replies: the bare text `pong`

use serde::{Deserialize, Serialize};

use crate::domain::market::ProviderTicker;

/// Channel carrying latest-price snapshots.
pub const TICKERS_CHANNEL: &str = "tickers";

/// A channel/instrument pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArg {
    /// Channel name.
    pub channel: String,
    /// Instrument id.
    #[serde(rename = "instId", default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
}

impl ChannelArg {
    /// Tickers channel for one instrument.
    #[must_use]
    pub fn tickers(inst_id: impl Into<String>) -> Self {
        Self {
            channel: TICKERS_CHANNEL.to_string(),
            inst_id: Some(inst_id.into()),
        }
    }
}

/// Subscription operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Start receiving pushes.
    Subscribe,
    /// Stop receiving pushes.
    Unsubscribe,
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Operation.
    pub op: Operation,
    /// Channels to (un)subscribe.
    pub args: Vec<ChannelArg>,
}

impl SubscribeRequest {
    /// Subscribe to the tickers channel for every instrument.
    #[must_use]
    pub fn tickers<I, S>(inst_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: Operation::Subscribe,
            args: inst_ids.into_iter().map(ChannelArg::tickers).collect(),
        }
    }
}

/// Operation acknowledgement or error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventMessage {
    /// `subscribe`, `unsubscribe`, `error`, `notice`, ...
    pub event: String,
    /// Channel the event refers to.
    #[serde(default)]
    pub arg: Option<ChannelArg>,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Error message.
    #[serde(default)]
    pub msg: Option<String>,
    /// Connection id assigned by the exchange.
    #[serde(rename = "connId", default)]
    pub conn_id: Option<String>,
}

impl EventMessage {
    /// Whether this is an error event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event == "error"
    }
}

/// Channel data push.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushMessage {
    /// Channel the data belongs to.
    pub arg: ChannelArg,
    /// Raw entries.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OkxMessage {
    /// Heartbeat reply.
    Pong,
    /// Operation acknowledgement or error.
    Event(EventMessage),
    /// Ticker entries from one push.
    Tickers(Vec<ProviderTicker>),
    /// Push for a channel this relay does not consume.
    Ignored {
        /// Channel name.
        channel: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let request = SubscribeRequest::tickers(["BTC-USDT", "BTC-USDT-SWAP"]);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"},{"channel":"tickers","instId":"BTC-USDT-SWAP"}]}"#
        );
    }

    #[test]
    fn error_event_parses() {
        let event: EventMessage = serde_json::from_str(
            r#"{"event":"error","code":"60018","msg":"Wrong URL or channel","connId":"a4d3ae55"}"#,
        )
        .unwrap();
        assert!(event.is_error());
        assert_eq!(event.code.as_deref(), Some("60018"));
        assert_eq!(event.conn_id.as_deref(), Some("a4d3ae55"));
    }
}
