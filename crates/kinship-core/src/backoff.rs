//! Jittered exponential backoff for reconnect attempts.
//!
//! The ceiling for attempt `n` is `min(base * 2^n, max)`. The actual delay
//! subtracts a random fraction (up to `jitter`) of the ceiling, so a fleet of
//! clients dropped at the same instant does not reconnect in lockstep.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter fraction.
pub const DEFAULT_JITTER: f64 = 0.5;

/// Backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Ceiling for the first retry
    pub base: Duration,
    /// Ceiling for every retry
    pub max: Duration,
    /// Fraction of the ceiling that may be subtracted at random, in `[0, 1]`
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: DEFAULT_BASE_DELAY, max: DEFAULT_MAX_DELAY, jitter: DEFAULT_JITTER }
    }
}

/// Attempt counter over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a counter with no failed attempts.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the next attempt.
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.policy.base.saturating_mul(factor).min(self.policy.max)
    }

    /// Delay before the next attempt. Advances the attempt counter.
    ///
    /// `random` is any uniformly distributed value; the caller supplies it so
    /// the policy stays deterministic under simulation.
    pub fn next_delay(&mut self, random: u64) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let span = ceiling.mul_f64(self.policy.jitter.clamp(0.0, 1.0));
        if span.is_zero() {
            return ceiling;
        }

        let offset = (u128::from(random) % (span.as_nanos() + 1)) as u64;
        ceiling.saturating_sub(Duration::from_nanos(offset))
    }

    /// Forget previous failures. Called on a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy { jitter: 0.0, ..BackoffPolicy::default() }
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = Backoff::new(no_jitter());
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay(0).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay(0);
        backoff.next_delay(0);
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(0), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        for random in [0, 1, u64::MAX / 3, u64::MAX] {
            backoff.reset();
            let delay = backoff.next_delay(random);
            assert!(delay <= DEFAULT_BASE_DELAY);
            assert!(delay >= DEFAULT_BASE_DELAY / 2);
        }
    }

    #[test]
    fn huge_attempt_count_saturates() {
        let mut backoff = Backoff::new(no_jitter());
        for _ in 0..100 {
            backoff.next_delay(7);
        }
        assert_eq!(backoff.next_delay(7), DEFAULT_MAX_DELAY);
    }
}
