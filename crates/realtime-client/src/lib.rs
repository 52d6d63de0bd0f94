//! Resilient realtime connection client.
//!
//! Keeps a single long-lived connection to a realtime server and shields the
//! caller from its failures:
//!
//! - Automatic reconnection with capped exponential backoff
//! - Heartbeat-based liveness detection
//! - Acknowledged delivery with per-request timeouts
//! - Buffering of outbound messages while disconnected, flushed in order
//! - Channel memberships replayed after every reconnect
//! - JSON text or MessagePack binary framing
//!
//! All state lives in one background task per client. [`Client`] handles
//! submit commands to it and get [`Pending`] futures back.
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), realtime_client::Error> {
//! use realtime_client::{Client, ClientConfig, Credentials, Event};
//!
//! let mut config = ClientConfig::new("wss://realtime.example.com/socket");
//! config.credentials = Some(Credentials::Token("my-token".to_string()));
//!
//! let client = Client::new(config)?;
//! let mut events = client.events();
//! client.connect().await?;
//! client.join("room1").await?;
//!
//! let ack = client.send("chat", serde_json::json!({ "text": "hi" })).await?;
//! println!("delivered {}", ack.id);
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         Event::Message(msg) => println!("got: {} {}", msg.kind, msg.payload),
//!         Event::Reconnecting { attempt, delay } => {
//!             println!("reconnect #{attempt} in {delay:?}")
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod correlation;
mod heartbeat;
mod protocol;
mod queue;
mod reconnect;
mod state;
mod subscriptions;
mod transport;
mod types;

pub use client::{Client, Events, Pending};
pub use protocol::{Codec, ErrorInfo, Frame, kind};
pub use reconnect::backoff_delay;
pub use state::ConnectionState;
pub use transport::{Link, LinkEvent, RawFrame, Transport, WsTransport};
pub use types::{
    Ack, BoxError, ClientConfig, Credentials, Error, Event, Message, MessageId, OutboundMessage,
    TimingConfig, TokenFuture, TokenProvider,
};
