//! Subscription registry: the channels the client wants to be joined to.
//!
//! The *desired* set survives reconnects and is only changed by `join` /
//! `leave`. The *confirmed* set mirrors what the server acknowledged on the
//! current connection and is wiped whenever the connection goes away.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    /// Insertion ordered, so replay follows join order.
    desired: Vec<String>,
    confirmed: HashSet<String>,
    in_flight: HashSet<String>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add to the desired set. Returns `false` if already present.
    pub(crate) fn add(&mut self, channel: &str) -> bool {
        if self.is_desired(channel) {
            return false;
        }
        self.desired.push(channel.to_string());
        true
    }

    /// Remove from every set. Returns `false` if it was not desired.
    pub(crate) fn remove(&mut self, channel: &str) -> bool {
        self.confirmed.remove(channel);
        self.in_flight.remove(channel);
        let before = self.desired.len();
        self.desired.retain(|c| c != channel);
        self.desired.len() != before
    }

    pub(crate) fn is_desired(&self, channel: &str) -> bool {
        self.desired.iter().any(|c| c == channel)
    }

    pub(crate) fn is_confirmed(&self, channel: &str) -> bool {
        self.confirmed.contains(channel)
    }

    pub(crate) fn is_in_flight(&self, channel: &str) -> bool {
        self.in_flight.contains(channel)
    }

    pub(crate) fn mark_in_flight(&mut self, channel: &str) {
        self.in_flight.insert(channel.to_string());
    }

    /// Record a join acknowledgment. Ignored if the channel was left while
    /// the join was in flight.
    pub(crate) fn confirm(&mut self, channel: &str) -> bool {
        self.in_flight.remove(channel);
        if self.is_desired(channel) {
            self.confirmed.insert(channel.to_string());
            true
        } else {
            false
        }
    }

    /// Record a failed join; the channel stays desired.
    pub(crate) fn join_failed(&mut self, channel: &str) {
        self.in_flight.remove(channel);
    }

    /// Desired channels that are neither confirmed nor awaiting an ack, in
    /// join order.
    pub(crate) fn unconfirmed(&self) -> Vec<String> {
        self.desired
            .iter()
            .filter(|c| !self.confirmed.contains(*c) && !self.in_flight.contains(*c))
            .cloned()
            .collect()
    }

    /// Forget everything learned on the current connection.
    pub(crate) fn reset_session(&mut self) {
        self.confirmed.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.add("room1"));
        assert!(!reg.add("room1"));
        assert_eq!(reg.unconfirmed(), vec!["room1"]);
    }

    #[test]
    fn replay_order_follows_join_order() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("b");
        reg.add("a");
        reg.add("c");
        assert_eq!(reg.unconfirmed(), vec!["b", "a", "c"]);
    }

    #[test]
    fn confirm_and_reset() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("room1");
        reg.mark_in_flight("room1");
        assert!(reg.unconfirmed().is_empty());
        assert!(reg.confirm("room1"));
        assert!(reg.is_confirmed("room1"));

        reg.reset_session();
        assert!(!reg.is_confirmed("room1"));
        assert!(reg.is_desired("room1"));
        assert_eq!(reg.unconfirmed(), vec!["room1"]);
    }

    #[test]
    fn confirm_after_leave_is_ignored() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("room1");
        reg.mark_in_flight("room1");
        assert!(reg.remove("room1"));
        assert!(!reg.confirm("room1"));
        assert!(!reg.is_confirmed("room1"));
    }

    #[test]
    fn failed_join_becomes_retryable() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("room1");
        reg.mark_in_flight("room1");
        reg.join_failed("room1");
        assert_eq!(reg.unconfirmed(), vec!["room1"]);
    }

    #[test]
    fn remove_unknown_returns_false() {
        let mut reg = SubscriptionRegistry::new();
        assert!(!reg.remove("nope"));
    }
}
