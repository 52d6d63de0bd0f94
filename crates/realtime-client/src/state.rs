//! Connection lifecycle states and the transition table.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a client. Exactly one value exists per client and only
/// the connection task changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::{
            Closed, Closing, Connected, Connecting, Disconnected, Reconnecting,
        };
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
                | (Closed, Connecting)
                | (Closing, Closed)
        ) || (to == Closing && self != Closing && self != Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Sole writer of the connection state; readers hold `watch::Receiver`s.
pub(crate) struct StateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    pub(crate) fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Self { tx }, rx)
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Apply a transition. Returns `false` (and leaves the state untouched)
    /// when the target is already current or the move is not in the table.
    pub(crate) fn transition(&self, to: ConnectionState) -> bool {
        let from = self.current();
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            tracing::error!(%from, %to, "Rejected invalid state transition");
            return false;
        }
        tracing::debug!(%from, %to, "State transition");
        self.tx.send_replace(to);
        true
    }
}
