//! Reconnection scheduling with capped exponential backoff.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::TimingConfig;

/// Delay before 1-based attempt `attempt`: `min(base * 2^(attempt-1), max)`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp).min(max)
}

/// Owns the reconnect attempt counter and the pending retry deadline.
///
/// The deadline is a plain value polled by the connection task; cancelling
/// it (`cancel`) guarantees the attempt never fires.
#[derive(Debug)]
pub(crate) struct ReconnectScheduler {
    base: Duration,
    max: Duration,
    jitter: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
    deadline: Option<Instant>,
}

impl ReconnectScheduler {
    pub(crate) fn new(timing: &TimingConfig, max_attempts: Option<u32>) -> Self {
        Self {
            base: timing.reconnect_base_delay,
            max: timing.reconnect_max_delay,
            jitter: timing.reconnect_jitter,
            max_attempts,
            attempt: 0,
            deadline: None,
        }
    }

    /// Schedule the next attempt. Returns the attempt number and the chosen
    /// delay, or `None` when the attempt budget is exhausted.
    ///
    /// `delay_override` replaces the computed backoff (server-requested
    /// reconnect delay).
    pub(crate) fn schedule(
        &mut self,
        now: Instant,
        delay_override: Option<Duration>,
    ) -> Option<(u32, Duration)> {
        let attempt = self.attempt.saturating_add(1);
        if let Some(max) = self.max_attempts
            && attempt > max
        {
            self.deadline = None;
            return None;
        }
        self.attempt = attempt;
        let delay = delay_override
            .unwrap_or_else(|| backoff_delay(self.base, self.max, attempt) + self.jitter());
        self.deadline = Some(now + delay);
        Some((attempt, delay))
    }

    /// Use subsecond nanos from the wall clock for non-deterministic jitter.
    fn jitter(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        Duration::from_millis(nanos % jitter_ms)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drop the pending deadline, either because it fired or because the
    /// attempt is no longer wanted.
    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Start a fresh failure run.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(base_ms: u64, max_ms: u64, max_attempts: Option<u32>) -> ReconnectScheduler {
        let timing = TimingConfig {
            reconnect_base_delay: Duration::from_millis(base_ms),
            reconnect_max_delay: Duration::from_millis(max_ms),
            ..Default::default()
        };
        ReconnectScheduler::new(&timing, max_attempts)
    }

    #[test]
    fn backoff_sequence_caps_at_max() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        let delays: Vec<u128> = (1..=6)
            .map(|n| backoff_delay(base, max, n).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn backoff_huge_attempt_does_not_overflow() {
        let d = backoff_delay(Duration::from_secs(1), Duration::from_secs(30), u32::MAX);
        assert_eq!(d, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn schedule_counts_attempts() {
        let mut s = scheduler(1000, 30_000, None);
        let now = Instant::now();
        assert_eq!(s.schedule(now, None), Some((1, Duration::from_millis(1000))));
        assert_eq!(s.deadline(), Some(now + Duration::from_millis(1000)));
        assert_eq!(s.schedule(now, None), Some((2, Duration::from_millis(2000))));
        assert_eq!(s.attempts(), 2);

        s.reset();
        assert_eq!(s.schedule(now, None), Some((1, Duration::from_millis(1000))));
    }

    #[tokio::test]
    async fn max_attempts_exhausts() {
        let mut s = scheduler(10, 100, Some(2));
        let now = Instant::now();
        assert!(s.schedule(now, None).is_some());
        assert!(s.schedule(now, None).is_some());
        assert_eq!(s.schedule(now, None), None);
        assert_eq!(s.deadline(), None);
        // Counter stays at the last attempt made
        assert_eq!(s.attempts(), 2);
    }

    #[tokio::test]
    async fn override_replaces_backoff() {
        let mut s = scheduler(1000, 30_000, None);
        let now = Instant::now();
        assert_eq!(
            s.schedule(now, Some(Duration::from_millis(250))),
            Some((1, Duration::from_millis(250)))
        );
    }

    #[tokio::test]
    async fn cancel_clears_deadline() {
        let mut s = scheduler(1000, 30_000, None);
        s.schedule(Instant::now(), None);
        assert!(s.deadline().is_some());
        s.cancel();
        assert_eq!(s.deadline(), None);
    }

    #[test]
    fn jitter_stays_below_bound() {
        let timing = TimingConfig {
            reconnect_jitter: Duration::from_millis(50),
            ..Default::default()
        };
        let s = ReconnectScheduler::new(&timing, None);
        for _ in 0..100 {
            assert!(s.jitter() < Duration::from_millis(50));
        }
    }
}
