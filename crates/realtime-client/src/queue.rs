//! Outbound queue: FIFO buffer for sends issued while not connected.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::types::{Ack, Error, OutboundMessage};

/// A send waiting for a connected window.
#[derive(Debug)]
pub(crate) struct QueuedSend {
    pub message: OutboundMessage,
    /// Acknowledgment timeout applied once the message is written.
    pub timeout: Duration,
    pub reply: oneshot::Sender<Result<Ack, Error>>,
}

#[derive(Debug)]
pub(crate) struct OutboundQueue {
    items: VecDeque<QueuedSend>,
    capacity: usize,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append to the tail. Hands the item back when the queue is full.
    pub(crate) fn enqueue(&mut self, item: QueuedSend) -> Result<(), QueuedSend> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedSend> {
        self.items.pop_front()
    }

    /// Put back an item that could not be written, keeping its place ahead
    /// of everything queued after it.
    pub(crate) fn requeue_front(&mut self, item: QueuedSend) {
        self.items.push_front(item);
    }

    /// Remove everything, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = QueuedSend> + '_ {
        self.items.drain(..)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::types::MessageId;

    fn item(id: &str) -> (QueuedSend, oneshot::Receiver<Result<Ack, Error>>) {
        let (reply, rx) = oneshot::channel();
        let message = OutboundMessage {
            id: MessageId::from(id),
            kind: "chat".to_string(),
            payload: serde_json::Value::Null,
            created_at: SystemTime::now(),
        };
        (
            QueuedSend {
                message,
                timeout: Duration::from_secs(10),
                reply,
            },
            rx,
        )
    }

    fn ids(queue: &mut OutboundQueue) -> Vec<String> {
        queue
            .drain()
            .map(|q| q.message.id.to_string())
            .collect()
    }

    #[test]
    fn preserves_insertion_order() {
        let mut queue = OutboundQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(item(id).0).unwrap();
        }
        assert_eq!(ids(&mut queue), vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn requeue_keeps_head_position() {
        let mut queue = OutboundQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(item(id).0).unwrap();
        }
        let head = queue.pop_front().unwrap();
        assert_eq!(head.message.id.as_str(), "a");
        queue.requeue_front(head);
        assert_eq!(ids(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn full_queue_rejects() {
        let mut queue = OutboundQueue::new(1);
        queue.enqueue(item("a").0).unwrap();
        let rejected = queue.enqueue(item("b").0).unwrap_err();
        assert_eq!(rejected.message.id.as_str(), "b");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 1);
    }
}
