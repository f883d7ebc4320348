//! OKX Frame Codec
//!
//! Decodes inbound text frames into [`OkxMessage`]s and encodes subscribe
//! requests. Ticker entries are decoded one by one so a single malformed entry
//! does not discard the rest of the push.

use super::heartbeat::PONG;
use super::messages::{EventMessage, OkxMessage, PushMessage, SubscribeRequest, TICKERS_CHANNEL};
use crate::domain::market::ProviderTicker;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is neither JSON object nor heartbeat text.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the OKX public channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct OkxCodec;

impl OkxCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a subscribe request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, request: &SubscribeRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for frames that are not heartbeat text, an event or a
    /// channel push.
    pub fn decode(&self, text: &str) -> Result<OkxMessage, CodecError> {
        let trimmed = text.trim();

        if trimmed == PONG {
            return Ok(OkxMessage::Pong);
        }
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(preview(trimmed)));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        if value.get("event").is_some() {
            let event: EventMessage = serde_json::from_value(value)?;
            return Ok(OkxMessage::Event(event));
        }
        if value.get("arg").is_some() && value.get("data").is_some() {
            let push: PushMessage = serde_json::from_value(value)?;
            return Ok(self.decode_push(push));
        }

        Err(CodecError::InvalidFormat(preview(trimmed)))
    }

    fn decode_push(&self, push: PushMessage) -> OkxMessage {
        if push.arg.channel != TICKERS_CHANNEL {
            return OkxMessage::Ignored {
                channel: push.arg.channel,
            };
        }

        let tickers = push
            .data
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<ProviderTicker>(entry) {
                Ok(ticker) => Some(ticker),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable ticker entry");
                    None
                }
            })
            .collect();
        OkxMessage::Tickers(tickers)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
