//! Retry backoff policy.
//!
//! Retries are never recursion: a failed attempt is re-inserted into the
//! queue with an incremented attempt number and an earliest-execution time
//! of `now + delay`. This module only computes the delay.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with bounded jitter.
///
/// `delay(attempt) = min(max_delay, base · 2^(attempt−1) · (1 + U(−0.2, +0.2)))`
/// where `attempt` is the 1-based attempt that just failed. Jitter applies
/// to the raw exponential; `max_delay` is a hard ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Cap applied before jitter.
    pub max_delay: Duration,

    /// Whether to apply the ±20 % jitter.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy with jitter enabled.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Disable jitter (deterministic delays, mainly for tests).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);

        let jittered = if self.jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(-0.2..=0.2);
            base * factor
        } else {
            base
        };
        let final_delay = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(final_delay.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_without_jitter() {
        let policy =
            RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(60)).without_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy =
            RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(30)).without_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(60));
        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(80), "too short: {delay:?}");
            assert!(delay <= Duration::from_millis(120), "too long: {delay:?}");
        }
    }

    #[test]
    fn max_delay_is_a_hard_ceiling() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        for attempt in [7, 12, u32::MAX] {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_secs(60), "over ceiling: {delay:?}");
        }
    }
}
