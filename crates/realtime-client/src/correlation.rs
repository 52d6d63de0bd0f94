//! Correlation tracker: pending requests awaiting acknowledgment.
//!
//! Each entry leaves the tracker through exactly one door: [`acknowledge`],
//! [`next_expired`] or [`drain`]. Whichever removes it first owns the
//! responder, so a given identifier resolves at most once.
//!
//! [`acknowledge`]: CorrelationTracker::acknowledge
//! [`next_expired`]: CorrelationTracker::next_expired
//! [`drain`]: CorrelationTracker::drain

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::types::{Ack, Error, MessageId};

/// Who is waiting for an acknowledgment.
#[derive(Debug)]
pub(crate) enum Responder {
    /// A caller's `send()`.
    Caller(oneshot::Sender<Result<Ack, Error>>),
    /// A channel join, either requested by a caller or replayed after a
    /// reconnect.
    Join {
        channel: String,
        reply: Option<oneshot::Sender<Result<(), Error>>>,
    },
    Leave {
        channel: String,
        reply: Option<oneshot::Sender<Result<(), Error>>>,
    },
    /// A liveness probe.
    Heartbeat,
}

impl Responder {
    /// Deliver a failure to whoever is waiting. Internal responders have no
    /// caller and are dropped.
    pub(crate) fn fail(self, err: Error) {
        match self {
            Responder::Caller(tx) => {
                let _ = tx.send(Err(err));
            }
            Responder::Join { reply, .. } | Responder::Leave { reply, .. } => {
                if let Some(tx) = reply {
                    let _ = tx.send(Err(err));
                }
            }
            Responder::Heartbeat => {}
        }
    }
}

#[derive(Debug)]
struct PendingCorrelation {
    responder: Responder,
    timeout_key: delay_queue::Key,
    registered_at: Instant,
}

#[derive(Debug)]
pub(crate) struct CorrelationTracker {
    pending: HashMap<MessageId, PendingCorrelation>,
    timeouts: DelayQueue<MessageId>,
}

impl CorrelationTracker {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
            timeouts: DelayQueue::new(),
        }
    }

    /// Register a pending request and arm its timeout.
    pub(crate) fn register(&mut self, id: MessageId, responder: Responder, timeout: Duration) {
        if let Some(previous) = self.pending.remove(&id) {
            // Ids come from a monotonic counter; a collision means a bug
            // upstream. Fail the older waiter rather than orphaning it.
            tracing::error!(%id, "Duplicate correlation id");
            self.timeouts.remove(&previous.timeout_key);
            previous.responder.fail(Error::Protocol(format!("duplicate id {id}")));
        }
        let timeout_key = self.timeouts.insert(id.clone(), timeout);
        self.pending.insert(
            id,
            PendingCorrelation {
                responder,
                timeout_key,
                registered_at: Instant::now(),
            },
        );
    }

    /// Resolve the entry for `id` on a matching acknowledgment. Returns
    /// `None` for unknown or already-resolved ids.
    pub(crate) fn acknowledge(&mut self, id: &MessageId) -> Option<Responder> {
        let entry = self.pending.remove(id)?;
        self.timeouts.remove(&entry.timeout_key);
        tracing::trace!(
            %id,
            rtt_ms = entry.registered_at.elapsed().as_millis() as u64,
            "Acknowledged"
        );
        Some(entry.responder)
    }

    /// Wait for the next request timeout.
    ///
    /// Pending forever while nothing is registered; the connection task
    /// re-creates this future on every loop iteration, so new registrations
    /// are picked up.
    pub(crate) async fn next_expired(&mut self) -> (MessageId, Responder) {
        loop {
            let expired = std::future::poll_fn(|cx| self.timeouts.poll_expired(cx)).await;
            match expired {
                Some(expired) => {
                    let id = expired.into_inner();
                    if let Some(entry) = self.pending.remove(&id) {
                        return (id, entry.responder);
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Remove every pending entry, cancelling all timers.
    pub(crate) fn drain(&mut self) -> Vec<(MessageId, Responder)> {
        self.timeouts.clear();
        self.pending
            .drain()
            .map(|(id, entry)| (id, entry.responder))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> (Responder, oneshot::Receiver<Result<Ack, Error>>) {
        let (tx, rx) = oneshot::channel();
        (Responder::Caller(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn ack_resolves_once() {
        let mut tracker = CorrelationTracker::new();
        let (responder, _rx) = caller();
        let id = MessageId::from("1");
        tracker.register(id.clone(), responder, Duration::from_secs(10));
        assert_eq!(tracker.len(), 1);

        assert!(tracker.acknowledge(&id).is_some());
        // Duplicate ack is dropped
        assert!(tracker.acknowledge(&id).is_none());
        assert_eq!(tracker.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ack_is_dropped() {
        let mut tracker = CorrelationTracker::new();
        assert!(tracker.acknowledge(&MessageId::from("nope")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_after_deadline() {
        let mut tracker = CorrelationTracker::new();
        let (responder, _rx) = caller();
        tracker.register(MessageId::from("1"), responder, Duration::from_secs(10));

        let start = Instant::now();
        let (id, responder) = tracker.next_expired().await;
        assert_eq!(id, MessageId::from("1"));
        assert!(matches!(responder, Responder::Caller(_)));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(tracker.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acked_entry_never_times_out() {
        let mut tracker = CorrelationTracker::new();
        let (first, _rx1) = caller();
        let (second, _rx2) = caller();
        tracker.register(MessageId::from("1"), first, Duration::from_secs(1));
        tracker.register(MessageId::from("2"), second, Duration::from_secs(5));
        assert!(tracker.acknowledge(&MessageId::from("1")).is_some());

        let (id, _) = tracker.next_expired().await;
        assert_eq!(id, MessageId::from("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_tracker_never_expires() {
        let mut tracker = CorrelationTracker::new();
        let result =
            tokio::time::timeout(Duration::from_secs(60), tracker.next_expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_fails_everything() {
        let mut tracker = CorrelationTracker::new();
        let (r1, rx1) = caller();
        let (r2, rx2) = caller();
        tracker.register(MessageId::from("1"), r1, Duration::from_secs(10));
        tracker.register(MessageId::from("2"), r2, Duration::from_secs(10));
        tracker.register(MessageId::from("3"), Responder::Heartbeat, Duration::from_secs(1));

        let drained = tracker.drain();
        assert_eq!(drained.len(), 3);
        for (_, responder) in drained {
            responder.fail(Error::ConnectionLost);
        }
        assert!(matches!(rx1.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(rx2.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(tracker.len(), 0);

        // Timers were cancelled with the entries
        let result =
            tokio::time::timeout(Duration::from_secs(60), tracker.next_expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn join_failure_reaches_caller() {
        let (tx, rx) = oneshot::channel();
        let responder = Responder::Join {
            channel: "room1".to_string(),
            reply: Some(tx),
        };
        responder.fail(Error::Timeout);
        assert!(matches!(rx.await.unwrap(), Err(Error::Timeout)));
    }
}
