//! OKX Feed Connector
//!
//! Owns the upstream WebSocket connection and emits [`FeedEvent`]s for the
//! ingestion supervisor.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Subscribed
//!      ▲               │              │
//!      └── delay ◀─────┴──────────────┘  (error / close / heartbeat timeout)
//! ```
//!
//! On entering `Subscribed` the connector sends one subscribe request for
//! every tracked instrument and starts the text heartbeat. Failures that mean
//! the endpoint cannot be reached from this network are reported as
//! [`FeedEvent::Unreachable`]; reconnection continues in both cases.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, OkxCodec};
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig, PING};
use super::messages::{OkxMessage, SubscribeRequest};
use super::proxy::{HttpProxy, ProxyError};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::FeedEvent;
use crate::infrastructure::metrics;

/// OKX v5 public WebSocket endpoint.
pub const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// Default bound on TCP + TLS + WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedConnectorError {
    /// Endpoint URL is unusable.
    #[error("invalid feed URL: {0}")]
    InvalidUrl(String),

    /// Connection was not established in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Proxy tunnel failed.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No inbound traffic within the pong timeout.
    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// The event receiver was dropped.
    #[error("event channel closed")]
    EventChannelClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl FeedConnectorError {
    /// Whether the endpoint is categorically unreachable from this network,
    /// as opposed to a transient disconnect.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::ConnectTimeout(_) | Self::Proxy(ProxyError::Refused { .. }) => true,
            Self::Proxy(ProxyError::Connect { source, .. }) => is_unreachable_io(source),
            Self::WebSocket(tungstenite::Error::Io(e)) => is_unreachable_io(e),
            _ => false,
        }
    }
}

fn is_unreachable_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::TimedOut
    )
}

// =============================================================================
// Configuration & State
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct FeedConnectorConfig {
    /// WebSocket URL.
    pub url: String,
    /// Instruments to subscribe to.
    pub instruments: Vec<String>,
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Heartbeat behavior.
    pub heartbeat: HeartbeatConfig,
    /// Forward proxy, if any.
    pub proxy: Option<HttpProxy>,
}

impl FeedConnectorConfig {
    /// Configuration for the given instruments against the public endpoint.
    #[must_use]
    pub fn new(instruments: Vec<String>) -> Self {
        Self {
            url: OKX_PUBLIC_WS_URL.to_string(),
            instruments,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            proxy: None,
        }
    }

    /// Override the endpoint URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorState {
    /// No connection.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and subscribed.
    Subscribed,
}

impl ConnectorState {
    /// Gauge value.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Subscribed => 2.0,
        }
    }
}

// =============================================================================
// Feed Connector
// =============================================================================

/// Upstream ticker connector.
pub struct FeedConnector {
    config: FeedConnectorConfig,
    codec: OkxCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    state: Arc<RwLock<ConnectorState>>,
}

impl std::fmt::Debug for FeedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnector")
            .field("url", &self.config.url)
            .field("instruments", &self.config.instruments.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FeedConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new(
        config: FeedConnectorConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: OkxCodec::new(),
            event_tx,
            cancel,
            state: Arc::new(RwLock::new(ConnectorState::Disconnected)),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state.read()
    }

    /// Shared handle to the connection state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<RwLock<ConnectorState>> {
        Arc::clone(&self.state)
    }

    /// Connect, subscribe and reconnect until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when max reconnect attempts are exhausted or the event
    /// receiver goes away.
    pub async fn run(self) -> Result<(), FeedConnectorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let attempt = policy.attempt_count() + 1;
            self.set_state(ConnectorState::Connecting);
            self.emit(FeedEvent::Connecting { attempt }).await?;

            let error = match self.connect_and_run(&mut policy).await {
                Ok(()) => break,
                Err(FeedConnectorError::EventChannelClosed) => {
                    self.set_state(ConnectorState::Disconnected);
                    return Err(FeedConnectorError::EventChannelClosed);
                }
                Err(e) => e,
            };

            self.set_state(ConnectorState::Disconnected);
            let reason = error.to_string();
            if error.is_unreachable() {
                tracing::warn!(url = %self.config.url, error = %error, "Upstream unreachable");
                self.emit(FeedEvent::Unreachable { reason }).await?;
            } else {
                tracing::warn!(url = %self.config.url, error = %error, "Upstream connection lost");
                self.emit(FeedEvent::Disconnected { reason }).await?;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(attempts = policy.attempt_count(), "Giving up on upstream");
                return Err(FeedConnectorError::MaxReconnectAttemptsExceeded);
            };
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectorState::Disconnected);
        tracing::info!("Feed connector stopped");
        Ok(())
    }

    /// One connection: connect, subscribe, pump frames until failure.
    ///
    /// Returns `Ok(())` only on cancellation.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedConnectorError> {
        tracing::info!(url = %self.config.url, proxy = ?self.config.proxy.as_ref().map(HttpProxy::addr), "Connecting to upstream");

        let ws = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            ws = self.open() => ws?,
        };
        let (mut write, mut read) = ws.split();

        let request = SubscribeRequest::tickers(self.config.instruments.iter().cloned());
        write
            .send(Message::Text(self.codec.encode(&request)?.into()))
            .await?;

        policy.reset();
        self.set_state(ConnectorState::Subscribed);
        self.emit(FeedEvent::Subscribed {
            instruments: self.config.instruments.len(),
        })
        .await?;
        tracing::info!(instruments = self.config.instruments.len(), "Subscribed to tickers");

        let mut heartbeat = Heartbeat::new(self.config.heartbeat);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                action = heartbeat.tick() => match action {
                    HeartbeatAction::SendPing => {
                        write.send(Message::Text(PING.into())).await?;
                    }
                    HeartbeatAction::TimedOut => {
                        return Err(FeedConnectorError::HeartbeatTimeout);
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_inbound();
                        self.handle_text(&text).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_inbound();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server sent close frame");
                        return Err(FeedConnectorError::ConnectionClosed);
                    }
                    Some(Ok(_)) => heartbeat.record_inbound(),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(FeedConnectorError::ConnectionClosed),
                },
            }
        }
    }

    async fn open(&self) -> Result<WsStream, FeedConnectorError> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(FeedConnectorError::ConnectTimeout(timeout)),
        }
    }

    async fn handshake(&self) -> Result<WsStream, FeedConnectorError> {
        let request = self.config.url.as_str().into_client_request()?;

        let (ws, _response) = match &self.config.proxy {
            None => tokio_tungstenite::connect_async(request).await?,
            Some(proxy) => {
                let uri = request.uri();
                let host = uri
                    .host()
                    .ok_or_else(|| FeedConnectorError::InvalidUrl(self.config.url.clone()))?
                    .to_string();
                let port = uri
                    .port_u16()
                    .unwrap_or(if uri.scheme_str() == Some("wss") { 443 } else { 80 });
                let stream = proxy.tunnel(&host, port).await?;
                tokio_tungstenite::client_async_tls(request, stream).await?
            }
        };
        Ok(ws)
    }

    async fn handle_text(&self, text: &str) -> Result<(), FeedConnectorError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return Ok(());
            }
        };

        match message {
            OkxMessage::Pong => {}
            OkxMessage::Event(event) if event.is_error() => {
                tracing::error!(
                    code = event.code.as_deref().unwrap_or_default(),
                    msg = event.msg.as_deref().unwrap_or_default(),
                    "Upstream error event"
                );
            }
            OkxMessage::Event(event) => {
                tracing::debug!(
                    event = %event.event,
                    arg = ?event.arg,
                    conn_id = event.conn_id.as_deref().unwrap_or_default(),
                    "Upstream event"
                );
            }
            OkxMessage::Tickers(tickers) => {
                for ticker in tickers {
                    self.emit(FeedEvent::Ticker(ticker)).await?;
                }
            }
            OkxMessage::Ignored { channel } => {
                tracing::debug!(channel = %channel, "Ignoring push for unconsumed channel");
            }
        }
        Ok(())
    }

    async fn emit(&self, event: FeedEvent) -> Result<(), FeedConnectorError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| FeedConnectorError::EventChannelClosed)
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.write() = state;
        metrics::set_connector_state(state.as_gauge());
    }
}
