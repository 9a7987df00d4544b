//! Retry controller: bounded, backed-off retry of a single unit of work.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the unit after this delay.
    Retry { delay: Duration },
    /// Stop: terminal classification or exhausted budget.
    GiveUp,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts (first execution included).
    pub max_attempts: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) to spread retries of many jobs apart.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// A policy with exponential backoff between `max_attempts` attempts.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// Backoff before re-running attempt `attempt + 1`, given that attempt
    /// `attempt` (1-indexed) just failed: `min(base * 2^(attempt-1), max)`
    /// plus deterministic jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt.saturating_sub(1)).min(32) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        // Deterministic "jitter" derived from the attempt number: spreads
        // herds without needing an RNG seam in tests.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt fits the budget after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Classify a failed attempt: terminal kinds short-circuit regardless
    /// of remaining budget; retryable kinds retry while budget remains.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() || !self.should_retry(attempt) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = no_jitter(5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(10));
    }

    #[test]
    fn terminal_kinds_short_circuit_budget() {
        let policy = no_jitter(5);
        assert_eq!(policy.decide(ErrorKind::Validation, 1), RetryDecision::GiveUp);
        assert_eq!(policy.decide(ErrorKind::Fatal, 1), RetryDecision::GiveUp);
        assert_eq!(policy.decide(ErrorKind::Cancelled, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn retryable_kinds_respect_budget() {
        let policy = no_jitter(3);
        assert!(matches!(
            policy.decide(ErrorKind::Transient, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.decide(ErrorKind::Consistency, 2),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(ErrorKind::Transient, 3), RetryDecision::GiveUp);
    }

    proptest! {
        /// Backoff never exceeds the cap plus its jitter allowance.
        #[test]
        fn delay_is_bounded(attempt in 1u32..64, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy {
                max_attempts: 64,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(30),
                jitter,
            };
            let delay = policy.delay_for_attempt(attempt);
            let ceiling = Duration::from_secs(30).mul_f64(1.0 + jitter);
            prop_assert!(delay <= ceiling);
        }

        /// Without jitter, backoff is monotonically non-decreasing.
        #[test]
        fn delay_is_monotonic_without_jitter(attempt in 1u32..62) {
            let policy = RetryPolicy {
                max_attempts: 64,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(30),
                jitter: 0.0,
            };
            prop_assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
        }
    }
}
