//! Public entry point: [`Client`], [`Pending`] and [`Events`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::connection::{Command, IdGenerator, Session, run_event_loop};
use crate::state::{ConnectionState, StateMachine};
use crate::transport::{Transport, WsTransport};
use crate::types::{Ack, ClientConfig, Error, Event, OutboundMessage};

/// Handle to a realtime connection.
///
/// Handles are cheap to clone; all clones drive the same connection. The
/// connection task runs in the background and stops once every handle has
/// been dropped, closing the connection on the way out.
#[derive(Debug, Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<Event>,
    ids: Arc<IdGenerator>,
    request_timeout: Duration,
}

impl Client {
    /// Create a client that connects over WebSocket.
    ///
    /// The client starts `Disconnected`; call [`connect`](Client::connect)
    /// to open the connection. Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::with_transport(config, WsTransport)
    }

    /// Create a client on top of a custom [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: impl Transport) -> Result<Self, Error> {
        config.validate()?;
        url::Url::parse(&config.address)?;

        let (events, _) = broadcast::channel(config.timing.event_channel_capacity);
        let (state, state_rx) = StateMachine::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ids = Arc::new(IdGenerator::default());
        let request_timeout = config.timing.request_timeout;

        let session = Session::new(
            config,
            Arc::new(transport),
            Arc::clone(&ids),
            state,
            events.clone(),
        );
        tokio::spawn(run_event_loop(session, cmd_rx));

        Ok(Self {
            cmd_tx,
            state_rx,
            events,
            ids,
            request_timeout,
        })
    }

    /// Open the connection.
    ///
    /// Resolves once connected, or with [`Error::ConnectFailed`] if the first
    /// attempt fails (automatic retries continue in the background). Calling
    /// this while already connected or connecting never opens a second
    /// connection.
    pub fn connect(&self) -> Pending<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply }, rx)
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Every pending send, queued message and connect waiter fails with
    /// [`Error::ClientDisconnect`]. Calling this on a closed client is a
    /// no-op. The client can be reopened with [`connect`](Client::connect).
    pub fn disconnect(&self) -> Pending<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply }, rx)
    }

    /// Send a message and wait for the server's acknowledgment, using the
    /// configured request timeout.
    ///
    /// While disconnected the message is buffered and written, in order,
    /// once the connection is back. Dropping the returned future before a
    /// buffered message is written cancels it. Once the client stops
    /// reconnecting (attempts exhausted, reconnection off, or a
    /// non-retryable server error) buffered messages fail with
    /// [`Error::ConnectionLost`], as does every send until the next
    /// [`connect`](Client::connect).
    pub fn send(&self, kind: impl Into<String>, payload: serde_json::Value) -> Pending<Ack> {
        self.send_with_timeout(kind, payload, self.request_timeout)
    }

    /// Like [`send`](Client::send) with an explicit acknowledgment timeout.
    pub fn send_with_timeout(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Pending<Ack> {
        let message = OutboundMessage {
            id: self.ids.next_id(),
            kind: kind.into(),
            payload,
            created_at: SystemTime::now(),
        };
        let (reply, rx) = oneshot::channel();
        self.command(
            Command::Send {
                message,
                timeout,
                reply,
            },
            rx,
        )
    }

    /// Join a channel. The membership is remembered and replayed after every
    /// reconnect until [`leave`](Client::leave) is called.
    ///
    /// Fails with [`Error::ClientDisconnect`] after
    /// [`disconnect`](Client::disconnect), like [`leave`](Client::leave).
    pub fn join(&self, channel: impl Into<String>) -> Pending<()> {
        let (reply, rx) = oneshot::channel();
        self.command(
            Command::Join {
                channel: channel.into(),
                reply,
            },
            rx,
        )
    }

    /// Leave a channel.
    pub fn leave(&self, channel: impl Into<String>) -> Pending<()> {
        let (reply, rx) = oneshot::channel();
        self.command(
            Command::Leave {
                channel: channel.into(),
                reply,
            },
            rx,
        )
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Register an observer. Each observer gets every event emitted after
    /// registration; a slow observer loses the oldest events instead of
    /// stalling the connection.
    pub fn events(&self) -> Events {
        Events {
            rx: self.events.subscribe(),
            dropped: 0,
        }
    }

    fn command<T>(&self, cmd: Command, rx: oneshot::Receiver<Result<T, Error>>) -> Pending<T> {
        match self.cmd_tx.send(cmd) {
            Ok(()) => Pending {
                inner: PendingInner::Waiting(rx),
            },
            Err(_) => Pending {
                inner: PendingInner::Failed(Some(Error::ClientGone)),
            },
        }
    }
}

/// Outcome of a client operation.
///
/// The operation is submitted when the method returns, whether or not this
/// future is ever polled.
#[derive(Debug)]
pub struct Pending<T> {
    inner: PendingInner<T>,
}

#[derive(Debug)]
enum PendingInner<T> {
    Waiting(oneshot::Receiver<Result<T, Error>>),
    Failed(Option<Error>),
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            PendingInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or_else(|_| Err(Error::ClientGone))),
            PendingInner::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(Error::ClientGone)))
            }
        }
    }
}

/// Stream of [`Event`]s for one observer.
#[derive(Debug)]
pub struct Events {
    rx: broadcast::Receiver<Event>,
    dropped: u64,
}

impl Events {
    /// Receive the next event. Returns `None` once the client is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    tracing::warn!(
                        skipped,
                        total_dropped = self.dropped,
                        "Event observer lagging, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events this observer lost to backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
