//! Connection management: the single task that owns a client's state.
//!
//! Every input (caller commands, inbound frames, transport open results,
//! connect deadline, reconnect deadline, heartbeat ticks and request
//! timeouts) is raced in one `tokio::select!` loop and handled to completion
//! before the next one is looked at. That serialization is what keeps the
//! state machine, tracker, queue and registry consistent without locks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::correlation::{CorrelationTracker, Responder};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{Codec, ErrorInfo, Frame, kind};
use crate::queue::{OutboundQueue, QueuedSend};
use crate::reconnect::ReconnectScheduler;
use crate::state::{ConnectionState, StateMachine};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{Link, LinkEvent, RawFrame, Transport, build_url};
use crate::types::{
    Ack, ClientConfig, Credentials, Error, Event, Message, MessageId, OutboundMessage,
};

type OpenFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Link>, Error>> + Send>>;
type Reply = oneshot::Sender<Result<(), Error>>;

fn error_or_unknown(error: Option<ErrorInfo>) -> ErrorInfo {
    error.unwrap_or_else(|| ErrorInfo {
        code: "unknown".to_string(),
        message: "no error details from server".to_string(),
        retryable: None,
    })
}

// ---------------------------------------------------------------------------
// Commands and ids
// ---------------------------------------------------------------------------

/// Work submitted by [`Client`](crate::Client) handles.
pub(crate) enum Command {
    Connect {
        reply: Reply,
    },
    Disconnect {
        reply: Reply,
    },
    Send {
        message: OutboundMessage,
        timeout: Duration,
        reply: oneshot::Sender<Result<Ack, Error>>,
    },
    Join {
        channel: String,
        reply: Reply,
    },
    Leave {
        channel: String,
        reply: Reply,
    },
}

/// Hands out message identifiers unique for the lifetime of a client.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub(crate) fn next_id(&self) -> MessageId {
        let n = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        MessageId::from(n.to_string())
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

pub(crate) struct Session {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    ids: Arc<IdGenerator>,
    state: StateMachine,
    events: broadcast::Sender<Event>,
    link: Option<Box<dyn Link>>,
    opening: Option<OpenFuture>,
    connect_deadline: Option<Instant>,
    awaiting_ready: bool,
    connect_waiters: Vec<Reply>,
    reconnect_suppressed: bool,
    /// Set once reconnection gave up; cleared by an explicit connect.
    retries_stopped: bool,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    tracker: CorrelationTracker,
    queue: OutboundQueue,
    subscriptions: SubscriptionRegistry,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        ids: Arc<IdGenerator>,
        state: StateMachine,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let scheduler = ReconnectScheduler::new(&config.timing, config.max_reconnect_attempts);
        let heartbeat = HeartbeatMonitor::new(
            config.timing.heartbeat_interval,
            config.timing.heartbeat_timeout,
        );
        let queue = OutboundQueue::new(config.max_queued_messages);
        Self {
            config,
            transport,
            ids,
            state,
            events,
            link: None,
            opening: None,
            connect_deadline: None,
            awaiting_ready: false,
            connect_waiters: Vec::new(),
            reconnect_suppressed: false,
            retries_stopped: false,
            scheduler,
            heartbeat,
            tracker: CorrelationTracker::new(),
            queue,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.current() == ConnectionState::Connected
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.state.current(),
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    fn emit(&self, event: Event) {
        // An error only means nobody is observing right now.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => self.connect(reply),
            Command::Disconnect { reply } => {
                self.teardown().await;
                let _ = reply.send(Ok(()));
            }
            Command::Send {
                message,
                timeout,
                reply,
            } => {
                self.send(QueuedSend {
                    message,
                    timeout,
                    reply,
                })
                .await;
            }
            Command::Join { channel, reply } => self.join(channel, reply).await,
            Command::Leave { channel, reply } => self.leave(channel, reply).await,
        }
    }

    fn connect(&mut self, reply: Reply) {
        match self.state.current() {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                tracing::debug!("connect() while a connection attempt is in progress");
                self.connect_waiters.push(reply);
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {
                self.reconnect_suppressed = false;
                self.retries_stopped = false;
                self.scheduler.reset();
                self.connect_waiters.push(reply);
                self.begin_connecting();
            }
            ConnectionState::Closing => {
                let _ = reply.send(Err(Error::ClientDisconnect));
            }
        }
    }

    async fn send(&mut self, item: QueuedSend) {
        match self.state.current() {
            ConnectionState::Connected => {
                if let Err(item) = self.dispatch(item).await {
                    let _ = item.reply.send(Err(Error::ConnectionLost));
                }
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                let _ = item.reply.send(Err(Error::ClientDisconnect));
            }
            ConnectionState::Disconnected if self.retries_stopped => {
                let _ = item.reply.send(Err(Error::ConnectionLost));
            }
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => {
                let capacity = self.queue.capacity();
                match self.queue.enqueue(item) {
                    Ok(()) => {
                        tracing::debug!(queued = self.queue.len(), "Buffered message until connected");
                    }
                    Err(item) => {
                        tracing::warn!(capacity, "Outbound queue full, rejecting message");
                        let _ = item.reply.send(Err(Error::QueueFull(capacity)));
                    }
                }
            }
        }
    }

    async fn join(&mut self, channel: String, reply: Reply) {
        if self.is_closed() {
            let _ = reply.send(Err(Error::ClientDisconnect));
            return;
        }
        self.subscriptions.add(&channel);
        if !self.is_connected()
            || self.subscriptions.is_confirmed(&channel)
            || self.subscriptions.is_in_flight(&channel)
        {
            // Replayed (or already under way) once connected
            let _ = reply.send(Ok(()));
            return;
        }
        self.send_join(channel, Some(reply)).await;
    }

    async fn leave(&mut self, channel: String, reply: Reply) {
        if self.is_closed() {
            let _ = reply.send(Err(Error::ClientDisconnect));
            return;
        }
        let was_desired = self.subscriptions.remove(&channel);
        if !self.is_connected() || !was_desired {
            let _ = reply.send(Ok(()));
            return;
        }
        let id = self.ids.next_id();
        let frame = Frame::leave(&id, &channel);
        let timeout = self.config.timing.request_timeout;
        self.send_tracked(
            frame,
            id,
            Responder::Leave {
                channel,
                reply: Some(reply),
            },
            timeout,
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    fn begin_connecting(&mut self) {
        if !self.state.transition(ConnectionState::Connecting) {
            return;
        }
        tracing::info!(
            address = %self.config.address,
            attempt = self.scheduler.attempts(),
            "Connecting"
        );
        let transport = Arc::clone(&self.transport);
        let address = self.config.address.clone();
        let credentials = self.config.credentials.clone();
        let format = self.config.codec.format_name();
        self.opening = Some(Box::pin(async move {
            let token = match credentials {
                Some(Credentials::Token(token)) => Some(token),
                Some(Credentials::Provider(provider)) => {
                    Some(provider().await.map_err(Error::TokenFetch)?)
                }
                None => None,
            };
            let url = build_url(&address, token.as_deref(), format)?;
            transport.open(&url).await
        }));
        self.connect_deadline = Some(Instant::now() + self.config.timing.connect_timeout);
    }

    async fn on_open_result(&mut self, result: Result<Box<dyn Link>, Error>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                if self.config.require_ready {
                    tracing::debug!("Transport open, waiting for ready");
                    self.awaiting_ready = true;
                } else {
                    self.on_connected().await;
                }
            }
            Err(e) => self.on_connect_failed(e.to_string(), None),
        }
    }

    fn on_connect_timeout(&mut self) {
        let timeout_ms = self.config.timing.connect_timeout.as_millis() as u64;
        self.on_connect_failed(format!("connect timed out after {timeout_ms}ms"), None);
    }

    fn on_connect_failed(&mut self, reason: String, delay_override: Option<Duration>) {
        tracing::warn!(attempt = self.scheduler.attempts(), %reason, "Connect attempt failed");
        self.opening = None;
        self.connect_deadline = None;
        self.awaiting_ready = false;
        self.link = None;
        self.state.transition(ConnectionState::Disconnected);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(Error::ConnectFailed(reason.clone())));
        }
        self.schedule_reconnect(delay_override);
    }

    async fn on_connected(&mut self) {
        self.connect_deadline = None;
        self.awaiting_ready = false;
        if !self.state.transition(ConnectionState::Connected) {
            return;
        }
        tracing::info!(queued = self.queue.len(), "Connected");
        self.scheduler.reset();
        self.heartbeat.start(Instant::now());
        self.emit(Event::Connected);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        // Channel membership first: queued traffic may depend on it
        self.replay_joins().await;
        self.flush_queue().await;
    }

    async fn replay_joins(&mut self) {
        for channel in self.subscriptions.unconfirmed() {
            if !self.is_connected() {
                return;
            }
            self.send_join(channel, None).await;
        }
    }

    async fn flush_queue(&mut self) {
        while self.is_connected() {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            if item.reply.is_closed() {
                tracing::debug!(id = %item.message.id, "Skipping queued message, caller went away");
                continue;
            }
            if let Err(item) = self.dispatch(item).await {
                self.queue.requeue_front(item);
                if self.retries_stopped {
                    self.abandon_queue();
                }
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconnection
    // -----------------------------------------------------------------------

    fn schedule_reconnect(&mut self, delay_override: Option<Duration>) {
        if !self.config.auto_reconnect || self.reconnect_suppressed {
            tracing::info!(
                suppressed = self.reconnect_suppressed,
                "Automatic reconnection off, staying disconnected"
            );
            self.state.transition(ConnectionState::Disconnected);
            self.abandon_queue();
            return;
        }
        match self.scheduler.schedule(Instant::now(), delay_override) {
            Some((attempt, delay)) => {
                self.state.transition(ConnectionState::Reconnecting);
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.emit(Event::Reconnecting { attempt, delay });
            }
            None => {
                let attempts = self.scheduler.attempts();
                tracing::error!(attempts, "Reconnect attempts exhausted");
                self.state.transition(ConnectionState::Disconnected);
                self.emit(Event::ReconnectExhausted { attempts });
                self.abandon_queue();
            }
        }
    }

    /// No connected window is coming: buffered sends fail now, and so does
    /// every send until the next explicit connect.
    fn abandon_queue(&mut self) {
        self.retries_stopped = true;
        if !self.queue.is_empty() {
            tracing::warn!(queued = self.queue.len(), "Failing buffered messages, not reconnecting");
        }
        for item in self.queue.drain() {
            let _ = item.reply.send(Err(Error::ConnectionLost));
        }
    }

    fn on_retry_due(&mut self) {
        self.scheduler.cancel();
        self.begin_connecting();
    }

    /// Connected → Reconnecting (or Disconnected when reconnection is off).
    fn on_connection_lost(&mut self, reason: String, delay_override: Option<Duration>) {
        self.link = None;
        if !self.is_connected() {
            return;
        }
        tracing::warn!(%reason, pending = self.tracker.len(), "Connection lost");
        self.heartbeat.stop();
        self.subscriptions.reset_session();
        for (_, responder) in self.tracker.drain() {
            responder.fail(Error::ConnectionLost);
        }
        self.emit(Event::Disconnected {
            reason: Some(reason),
        });
        self.schedule_reconnect(delay_override);
    }

    fn on_link_down(&mut self, reason: String, delay_override: Option<Duration>) {
        match self.state.current() {
            ConnectionState::Connecting => self.on_connect_failed(reason, delay_override),
            ConnectionState::Connected => self.on_connection_lost(reason, delay_override),
            _ => self.link = None,
        }
    }

    /// Any state → Closing → Closed.
    async fn teardown(&mut self) {
        let from = self.state.current();
        if from == ConnectionState::Closed {
            return;
        }
        self.state.transition(ConnectionState::Closing);
        tracing::info!(
            %from,
            pending = self.tracker.len(),
            queued = self.queue.len(),
            "Disconnecting"
        );
        self.opening = None;
        self.connect_deadline = None;
        self.awaiting_ready = false;
        self.scheduler.cancel();
        self.heartbeat.stop();
        for (_, responder) in self.tracker.drain() {
            responder.fail(Error::ClientDisconnect);
        }
        for item in self.queue.drain() {
            let _ = item.reply.send(Err(Error::ClientDisconnect));
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(Error::ClientDisconnect));
        }
        self.subscriptions.reset_session();
        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(self.config.timing.close_timeout, link.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Close handshake failed: {e}"),
                Err(_) => tracing::debug!("Close handshake timed out"),
            }
        }
        self.state.transition(ConnectionState::Closed);
        self.emit(Event::Closed);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    async fn write(&mut self, raw: RawFrame) -> Result<(), Error> {
        match self.link.as_mut() {
            Some(link) => link.send(raw).await,
            None => Err(Error::Transport("no open link".to_string())),
        }
    }

    /// Write a caller's message and start tracking it. A write failure tears
    /// the connection down and hands the item back unresolved.
    async fn dispatch(&mut self, item: QueuedSend) -> Result<(), QueuedSend> {
        let raw = match self.config.codec.encode(&Frame::message(&item.message)) {
            Ok(raw) => raw,
            Err(e) => {
                let _ = item.reply.send(Err(e));
                return Ok(());
            }
        };
        match self.write(raw).await {
            Ok(()) => {
                tracing::trace!(id = %item.message.id, kind = %item.message.kind, "Sent");
                self.tracker
                    .register(item.message.id, Responder::Caller(item.reply), item.timeout);
                Ok(())
            }
            Err(e) => {
                self.on_connection_lost(format!("write failed: {e}"), None);
                Err(item)
            }
        }
    }

    /// Write an internal frame and register its responder.
    async fn send_tracked(
        &mut self,
        frame: Frame,
        id: MessageId,
        responder: Responder,
        timeout: Duration,
    ) {
        let raw = match self.config.codec.encode(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                responder.fail(e);
                return;
            }
        };
        match self.write(raw).await {
            Ok(()) => self.tracker.register(id, responder, timeout),
            Err(e) => {
                responder.fail(Error::ConnectionLost);
                self.on_connection_lost(format!("write failed: {e}"), None);
            }
        }
    }

    async fn send_join(&mut self, channel: String, reply: Option<Reply>) {
        let id = self.ids.next_id();
        let frame = Frame::join(&id, &channel);
        self.subscriptions.mark_in_flight(&channel);
        tracing::debug!(%channel, %id, "Joining channel");
        let timeout = self.config.timing.request_timeout;
        self.send_tracked(frame, id, Responder::Join { channel, reply }, timeout)
            .await;
    }

    async fn on_heartbeat_tick(&mut self) {
        if !self.heartbeat.tick(Instant::now()) {
            return;
        }
        let id = self.ids.next_id();
        self.heartbeat.probe_sent(id.clone());
        let timeout = self.heartbeat.probe_timeout();
        tracing::trace!(%id, "Sending heartbeat");
        self.send_tracked(Frame::ping(&id), id, Responder::Heartbeat, timeout)
            .await;
        // Channels whose join failed earlier on this connection
        self.replay_joins().await;
    }

    async fn answer_ping(&mut self, id: &str) {
        let raw = match self.config.codec.encode(&Frame::ack(id)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to encode ping ack: {e}");
                return;
            }
        };
        if let Err(e) = self.write(raw).await {
            self.on_link_down(format!("write failed: {e}"), None);
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_link_event(&mut self, event: Result<LinkEvent, Error>) {
        match event {
            Ok(LinkEvent::Frame(raw)) => match Codec::decode(&raw) {
                Ok(frame) => self.on_frame(frame).await,
                Err(e) => {
                    tracing::warn!("Failed to decode frame: {e}");
                    self.emit(Event::ProtocolError {
                        message: e.to_string(),
                    });
                }
            },
            Ok(LinkEvent::Closed { code, reason }) => {
                tracing::info!(?code, %reason, "Connection closed by peer");
                let reason = match code {
                    Some(code) => format!("closed by peer ({code}): {reason}"),
                    None => format!("closed by peer: {reason}"),
                };
                self.on_link_down(reason, None);
            }
            Err(e) => {
                tracing::warn!("Transport error: {e}");
                self.on_link_down(e.to_string(), None);
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        if let Some(ack) = frame.ack {
            self.on_ack(MessageId::from(ack), frame.payload, frame.error);
            return;
        }
        match frame.kind.as_deref() {
            Some(kind::READY) => {
                if self.awaiting_ready {
                    self.on_connected().await;
                } else {
                    tracing::debug!("Ignoring ready outside of handshake");
                }
            }
            Some(kind::ERROR) => self.on_server_error(frame.error),
            Some(kind::SHUTDOWN) => self.on_server_shutdown(frame.reconnect_after),
            Some(kind::PING) => match frame.id {
                Some(id) => self.answer_ping(&id).await,
                None => tracing::debug!("Ignoring ping without id"),
            },
            Some(other) => {
                let message = Message {
                    id: frame.id,
                    kind: other.to_string(),
                    channel: frame.channel,
                    payload: frame.payload.unwrap_or(serde_json::Value::Null),
                    timestamp: frame.timestamp,
                };
                self.emit(Event::Message(message));
            }
            None => {
                tracing::warn!("Dropping frame with neither type nor ack");
                self.emit(Event::ProtocolError {
                    message: "frame has neither type nor ack".to_string(),
                });
            }
        }
    }

    fn on_ack(
        &mut self,
        id: MessageId,
        payload: Option<serde_json::Value>,
        error: Option<ErrorInfo>,
    ) {
        let Some(responder) = self.tracker.acknowledge(&id) else {
            tracing::debug!(%id, "Dropping unmatched acknowledgment");
            return;
        };
        match responder {
            Responder::Caller(tx) => {
                let outcome = match error {
                    Some(err) => Err(Error::Rejected {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(Ack { id, payload }),
                };
                let _ = tx.send(outcome);
            }
            Responder::Heartbeat => {
                if !self.heartbeat.acknowledge(&id) {
                    tracing::debug!(%id, "Stale heartbeat acknowledgment");
                }
            }
            Responder::Join { channel, reply } => match error {
                None => {
                    if self.subscriptions.confirm(&channel) {
                        tracing::info!(%channel, "Joined channel");
                    }
                    if let Some(tx) = reply {
                        let _ = tx.send(Ok(()));
                    }
                }
                Some(err) => {
                    let rejected = Error::Rejected {
                        code: err.code,
                        message: err.message.clone(),
                    };
                    self.join_failed(channel, err.message, reply, rejected);
                }
            },
            Responder::Leave { channel, reply } => {
                tracing::debug!(%channel, "Left channel");
                if let Some(tx) = reply {
                    let outcome = match error {
                        Some(err) => Err(Error::Rejected {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(()),
                    };
                    let _ = tx.send(outcome);
                }
            }
        }
    }

    fn on_request_timeout(&mut self, id: MessageId, responder: Responder) {
        match responder {
            Responder::Heartbeat => {
                tracing::warn!(%id, "Heartbeat timeout");
                self.on_connection_lost("heartbeat timeout".to_string(), None);
            }
            Responder::Join { channel, reply } => {
                self.join_failed(channel, "timeout".to_string(), reply, Error::Timeout);
            }
            other => {
                tracing::debug!(%id, "Request timed out");
                other.fail(Error::Timeout);
            }
        }
    }

    fn join_failed(&mut self, channel: String, reason: String, reply: Option<Reply>, err: Error) {
        self.subscriptions.join_failed(&channel);
        if let Some(tx) = reply {
            let _ = tx.send(Err(err));
        }
        if self.subscriptions.is_desired(&channel) {
            tracing::warn!(%channel, %reason, "Join failed, retrying on next heartbeat");
            self.emit(Event::JoinFailed { channel, reason });
        }
    }

    fn on_server_error(&mut self, error: Option<ErrorInfo>) {
        let err = error_or_unknown(error);
        let retryable = err.is_retryable();
        tracing::warn!(code = %err.code, retryable, "Server error: {}", err.message);
        if !retryable {
            tracing::info!("Automatic reconnection suppressed until the next connect()");
            self.reconnect_suppressed = true;
        }
        self.emit(Event::ServerError {
            code: err.code,
            message: err.message,
            retryable,
        });
    }

    fn on_server_shutdown(&mut self, reconnect_after: Option<u64>) {
        tracing::info!(reconnect_after_ms = reconnect_after, "Server shutting down");
        // The server invited us back: count from attempt 1 again
        self.scheduler.reset();
        self.on_link_down(
            "server shutdown".to_string(),
            reconnect_after.map(Duration::from_millis),
        );
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn poll_open(opening: &mut Option<OpenFuture>) -> Result<Box<dyn Link>, Error> {
    match opening.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_link(link: &mut Option<Box<dyn Link>>) -> Result<LinkEvent, Error> {
    match link.as_mut() {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn run_event_loop(mut s: Session, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => s.handle_command(cmd).await,
                None => {
                    tracing::debug!("All client handles dropped, shutting down");
                    s.teardown().await;
                    return;
                }
            },

            opened = poll_open(&mut s.opening) => {
                s.opening = None;
                s.on_open_result(opened).await;
            }

            _ = sleep_until_opt(s.connect_deadline) => s.on_connect_timeout(),

            _ = sleep_until_opt(s.scheduler.deadline()) => s.on_retry_due(),

            _ = sleep_until_opt(s.heartbeat.next_probe()) => s.on_heartbeat_tick().await,

            (id, responder) = s.tracker.next_expired() => s.on_request_timeout(id, responder),

            event = recv_link(&mut s.link) => s.on_link_event(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids = IdGenerator::default();
        assert_eq!(ids.next_id(), MessageId::from("1"));
        assert_eq!(ids.next_id(), MessageId::from("2"));
        assert_eq!(ids.next_id(), MessageId::from("3"));
    }

    #[test]
    fn error_or_unknown_fills_missing_details() {
        let err = error_or_unknown(None);
        assert_eq!(err.code, "unknown");
        assert!(err.is_retryable());

        let given = ErrorInfo {
            code: "banned".to_string(),
            message: "go away".to_string(),
            retryable: Some(false),
        };
        assert_eq!(error_or_unknown(Some(given.clone())), given);
    }
}
