//! Heartbeat monitor: periodic liveness probes while connected.
//!
//! The monitor only decides *when* to probe and remembers the outstanding
//! probe. Probes travel through the correlation tracker like any other
//! request; a probe timeout is reported by the tracker and handled by the
//! connection task as a lost connection.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::MessageId;

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    next_probe: Option<Instant>,
    outstanding: Option<MessageId>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_probe: None,
            outstanding: None,
        }
    }

    /// Arm the first probe one interval from `now`. No-op when heartbeats
    /// are disabled (zero interval).
    pub(crate) fn start(&mut self, now: Instant) {
        self.outstanding = None;
        self.next_probe = if self.interval.is_zero() {
            None
        } else {
            Some(now + self.interval)
        };
    }

    /// Stop probing. No further tick fires until the next `start`.
    pub(crate) fn stop(&mut self) {
        self.next_probe = None;
        self.outstanding = None;
    }

    pub(crate) fn next_probe(&self) -> Option<Instant> {
        self.next_probe
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        self.timeout
    }

    /// Advance to the next interval. Returns `true` when a new probe should
    /// be sent now, `false` if the previous probe is still unanswered.
    pub(crate) fn tick(&mut self, now: Instant) -> bool {
        if self.next_probe.is_none() {
            return false;
        }
        self.next_probe = Some(now + self.interval);
        self.outstanding.is_none()
    }

    pub(crate) fn probe_sent(&mut self, id: MessageId) {
        self.outstanding = Some(id);
    }

    /// Record the probe acknowledgment. Returns whether `id` was the
    /// outstanding probe.
    pub(crate) fn acknowledge(&mut self, id: &MessageId) -> bool {
        if self.outstanding.as_ref() == Some(id) {
            self.outstanding = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_secs(15), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn inactive_until_started() {
        let mut hb = monitor();
        assert_eq!(hb.next_probe(), None);
        assert!(!hb.tick(Instant::now()));
    }

    #[tokio::test]
    async fn start_arms_one_interval_ahead() {
        let mut hb = monitor();
        let now = Instant::now();
        hb.start(now);
        assert_eq!(hb.next_probe(), Some(now + Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn tick_probes_once_per_outstanding() {
        let mut hb = monitor();
        let now = Instant::now();
        hb.start(now);
        assert!(hb.tick(now));
        hb.probe_sent(MessageId::from("1"));
        // Previous probe unanswered: skip this round
        assert!(!hb.tick(now));
        assert!(hb.acknowledge(&MessageId::from("1")));
        assert!(hb.tick(now));
    }

    #[tokio::test]
    async fn acknowledge_ignores_other_ids() {
        let mut hb = monitor();
        hb.start(Instant::now());
        hb.probe_sent(MessageId::from("1"));
        assert!(!hb.acknowledge(&MessageId::from("2")));
    }

    #[tokio::test]
    async fn stop_disarms() {
        let mut hb = monitor();
        hb.start(Instant::now());
        hb.probe_sent(MessageId::from("1"));
        hb.stop();
        assert_eq!(hb.next_probe(), None);
        assert!(!hb.tick(Instant::now()));
    }

    #[tokio::test]
    async fn zero_interval_disables() {
        let mut hb = HeartbeatMonitor::new(Duration::ZERO, Duration::ZERO);
        hb.start(Instant::now());
        assert_eq!(hb.next_probe(), None);
    }
}
