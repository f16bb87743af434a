//! Reconnection backoff
//!
//! Pure policy and attempt bookkeeping; the session event loop owns the
//! actual timers so pending attempts can be cancelled by a manual reconnect
//! or a deliberate stop.

use std::time::Duration;

/// Exponential backoff parameters for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `n` (1-indexed): `min(base * 2^(n-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(31);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Tracks consecutive connection failures.
#[derive(Debug, Default)]
pub struct ReconnectState {
    attempts: u32,
    last_failure: Option<String>,
}

impl ReconnectState {
    /// Register a failure and return the delay before the next automatic
    /// attempt, or `None` once the policy's attempt cap is exhausted.
    pub fn next_attempt(&mut self, policy: &ReconnectPolicy, reason: String) -> Option<Duration> {
        self.last_failure = Some(reason);
        if self.attempts >= policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(policy.delay_for(self.attempts))
    }

    /// A successful connection resets the backoff to its base values.
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }

    /// Manual reconnect and deliberate disconnect both clear all state.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(31), Duration::from_millis(30_000));
    }

    #[test]
    fn success_resets_backoff_to_base() {
        let policy = ReconnectPolicy::default();
        let mut state = ReconnectState::default();

        for _ in 0..3 {
            state.next_attempt(&policy, "refused".into());
        }
        assert_eq!(state.attempts(), 3);

        state.record_success();
        assert_eq!(
            state.next_attempt(&policy, "refused".into()),
            Some(policy.base_delay)
        );
    }

    #[test]
    fn exhaustion_requires_manual_reset() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let mut state = ReconnectState::default();

        assert!(state.next_attempt(&policy, "a".into()).is_some());
        assert!(state.next_attempt(&policy, "b".into()).is_some());
        assert_eq!(state.next_attempt(&policy, "c".into()), None);
        assert_eq!(state.last_failure(), Some("c"));

        state.reset();
        assert!(state.next_attempt(&policy, "d".into()).is_some());
    }
}
