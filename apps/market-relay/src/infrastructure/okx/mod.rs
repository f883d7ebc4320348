//! OKX Public WebSocket Adapter
//!
//! - `client`: feed connector (connect, subscribe, heartbeat, reconnect)
//! - `codec`: inbound frame decoding and subscribe encoding
//! - `messages`: v5 wire types
//! - `heartbeat`: text ping/pong liveness
//! - `reconnect`: fixed or exponential reconnect delays
//! - `proxy`: HTTP CONNECT tunnel for restricted networks

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod proxy;
pub mod reconnect;

pub use client::{
    ConnectorState, DEFAULT_CONNECT_TIMEOUT, FeedConnector, FeedConnectorConfig,
    FeedConnectorError, OKX_PUBLIC_WS_URL,
};
pub use heartbeat::HeartbeatConfig;
pub use proxy::{HttpProxy, ProxyError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectStrategy};
