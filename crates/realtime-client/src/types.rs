//! Public types for the realtime-client crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_tungstenite::tungstenite;

use crate::protocol::Codec;

/// A future that resolves to a fresh access token.
pub type TokenFuture = Pin<Box<dyn Future<Output = Result<String, BoxError>> + Send>>;

/// A boxed error type for the token callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked on every connection attempt to obtain an access token.
pub type TokenProvider = Arc<dyn Fn() -> TokenFuture + Send + Sync>;

/// Credentials presented when opening the connection.
#[derive(Clone)]
pub enum Credentials {
    /// A fixed token, reused for every connection attempt.
    Token(String),
    /// A callback returning a fresh token for each attempt.
    Provider(TokenProvider),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Credentials::Token(<redacted>)"),
            Credentials::Provider(_) => f.write_str("Credentials::Provider(..)"),
        }
    }
}

/// Identifier of an outbound message, unique for the lifetime of a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        MessageId(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message created by a caller, waiting to be written or acknowledged.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: MessageId,
    /// Logical message type (e.g. `"chat"`).
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: SystemTime,
}

/// Successful acknowledgment of an outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub id: MessageId,
    /// Optional response body carried by the acknowledgment.
    pub payload: Option<serde_json::Value>,
}

/// An application message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    /// Logical message type.
    pub kind: String,
    /// Channel the message was published on, if any.
    pub channel: Option<String>,
    pub payload: serde_json::Value,
    /// Server timestamp (milliseconds since epoch).
    pub timestamp: Option<i64>,
}

/// Events emitted to observers registered with [`Client::events`](crate::Client::events).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection established (initially or after a reconnect).
    Connected,
    /// The connection was lost. The client reconnects unless reconnection is
    /// disabled or suppressed.
    Disconnected { reason: Option<String> },
    /// A reconnect attempt has been scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The configured maximum number of reconnect attempts was exceeded.
    ReconnectExhausted { attempts: u32 },
    /// An application message was received.
    Message(Message),
    /// The server signaled an error. `retryable: false` suppresses automatic
    /// reconnection until the next explicit `connect()`.
    ServerError {
        code: String,
        message: String,
        retryable: bool,
    },
    /// A malformed inbound frame was dropped. The connection stays up.
    ProtocolError { message: String },
    /// Joining a channel failed; the join is retried on the next heartbeat.
    JoinFailed { channel: String, reason: String },
    /// The client was closed by `disconnect()`.
    Closed,
}

/// Timing knobs for [`ClientConfig`]. All fields have sensible defaults.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Delay before the first reconnect attempt; doubled on every attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Upper bound on random jitter added to each reconnect delay. Zero
    /// disables jitter.
    pub reconnect_jitter: Duration,
    /// Interval between liveness probes. Zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// How long a liveness probe may stay unacknowledged. Must be shorter
    /// than `heartbeat_interval`.
    pub heartbeat_timeout: Duration,
    /// Default acknowledgment timeout for `send()`.
    pub request_timeout: Duration,
    /// Budget for token fetch, transport open and (optionally) the `ready`
    /// handshake.
    pub connect_timeout: Duration,
    /// Budget for the graceful close on `disconnect()`.
    pub close_timeout: Duration,
    /// Capacity of each observer's event channel.
    pub event_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::ZERO,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(2),
            event_channel_capacity: 64,
        }
    }
}

/// Configuration for [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target address, e.g. `"wss://realtime.example.com/socket"`.
    pub address: String,
    pub credentials: Option<Credentials>,
    /// Wire encoding. Defaults to JSON text frames.
    pub codec: Codec,
    /// Reconnect automatically after the connection is lost.
    pub auto_reconnect: bool,
    /// Give up after this many consecutive failed attempts. `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Stay in `Connecting` until the server sends a `ready` frame.
    pub require_ready: bool,
    /// Maximum number of messages buffered while disconnected.
    pub max_queued_messages: usize,
    pub timing: TimingConfig,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: None,
            codec: Codec::default(),
            auto_reconnect: true,
            max_reconnect_attempts: None,
            require_ready: false,
            max_queued_messages: 1024,
            timing: TimingConfig::default(),
        }
    }

    /// Reject configurations whose timers contradict each other.
    pub fn validate(&self) -> Result<(), Error> {
        let t = &self.timing;
        if t.reconnect_base_delay > t.reconnect_max_delay {
            return Err(Error::Config(
                "reconnect_base_delay must not exceed reconnect_max_delay".to_string(),
            ));
        }
        if !t.heartbeat_interval.is_zero() && t.heartbeat_timeout >= t.heartbeat_interval {
            return Err(Error::Config(
                "heartbeat_timeout must be shorter than heartbeat_interval".to_string(),
            ));
        }
        if t.request_timeout.is_zero() || t.connect_timeout.is_zero() {
            return Err(Error::Config(
                "request_timeout and connect_timeout must be non-zero".to_string(),
            ));
        }
        if t.event_channel_capacity == 0 {
            return Err(Error::Config(
                "event_channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out waiting for acknowledgment")]
    Timeout,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Client disconnected")]
    ClientDisconnect,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Server rejected request: code={code}, {message}")]
    Rejected { code: String, message: String },

    #[error("Outbound queue full ({0} messages)")]
    QueueFull(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("Token fetch failed: {0}")]
    TokenFetch(BoxError),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Client task has stopped")]
    ClientGone,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::new("ws://127.0.0.1:9000");
        assert!(config.validate().is_ok());
        assert!(config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.timing.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn heartbeat_timeout_must_be_shorter_than_interval() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9000");
        config.timing.heartbeat_interval = Duration::from_secs(5);
        config.timing.heartbeat_timeout = Duration::from_secs(5);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        // Disabled heartbeats skip the check
        config.timing.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_delay_above_max_rejected() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9000");
        config.timing.reconnect_base_delay = Duration::from_secs(60);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_event_capacity_rejected() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9000");
        config.timing.event_channel_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn credentials_debug_hides_token() {
        let creds = Credentials::Token("secret-token".to_string());
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn message_id_display() {
        let id = MessageId::from("42");
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_str(), "42");
    }
}
