//! Bounded exponential backoff for resubscription.
//!
//! Credential-expiry errors are retried by recreating the channel. Each
//! attempt waits longer than the last, up to a cap, and after
//! `max_attempts` consecutive failures the topic is left down.

use std::time::Duration;

use rand::Rng;

/// Backoff policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Consecutive attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Fraction (0.0-1.0) of each delay randomised away.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// No delay, no attempts. Every expiry opens the circuit.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0, 0.0)
    }

    /// The undisturbed delay before `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// The delay before `attempt` (1-based), with jitter applied downwards
    /// so the cap is never exceeded.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(factor)
    }

    /// Whether `attempt` (1-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            8,
            Duration::from_millis(500),
            Duration::from_secs(30),
            2.0,
            0.2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::ZERO);
        assert_eq!(policy.base_delay(1), Duration::from_millis(500));
        assert_eq!(policy.base_delay(2), Duration::from_secs(1));
        assert_eq!(policy.base_delay(3), Duration::from_secs(2));
        assert_eq!(policy.base_delay(8), Duration::from_secs(30));
        assert_eq!(policy.base_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = BackoffPolicy::default();
        assert!(!policy.allows(0));
        assert!(policy.allows(1));
        assert!(policy.allows(8));
        assert!(!policy.allows(9));
        assert!(!BackoffPolicy::disabled().allows(1));
    }

    proptest! {
        #[test]
        fn jitter_never_exceeds_base(attempt in 1u32..20, jitter in 0.0f64..1.0) {
            let policy = BackoffPolicy::new(20, Duration::from_millis(100), Duration::from_secs(5), 2.0, jitter);
            let delay = policy.delay_for_attempt(attempt);
            let base = policy.base_delay(attempt);
            prop_assert!(delay <= base + Duration::from_nanos(1));
            prop_assert!(delay >= base.mul_f64(1.0 - jitter) - Duration::from_nanos(1));
        }
    }
}
