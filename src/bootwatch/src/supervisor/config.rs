use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_HEALTH_CHECK_INTERVAL_MS, DEFAULT_HEALTH_CHECK_MAX_MISSES,
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READINESS_POLL_INTERVAL_MS,
    DEFAULT_READINESS_TIMEOUT_MS, DEFAULT_TERMINATION_GRACE_MS,
};

/// Restart delay growth.
///
/// The delay for restart `n` (0-indexed) is `first × factor^n`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BackoffPolicy {
    pub fn next(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exponent);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Immutable per-supervisor settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub health_check_interval: Duration,
    pub health_check_max_misses: u32,
    pub probe_timeout: Duration,
    pub max_restart_attempts: u32,
    pub backoff: BackoffPolicy,
    pub termination_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS),
            readiness_poll_interval: Duration::from_millis(DEFAULT_READINESS_POLL_INTERVAL_MS),
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            health_check_max_misses: DEFAULT_HEALTH_CHECK_MAX_MISSES,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            termination_grace: Duration::from_millis(DEFAULT_TERMINATION_GRACE_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
        }
    }

    #[test]
    fn test_attempt_zero_returns_first() {
        assert_eq!(policy(1_000, 30_000, 2.0).next(0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_exponential_growth() {
        let backoff = policy(100, 30_000, 2.0);
        assert_eq!(backoff.next(1), Duration::from_millis(200));
        assert_eq!(backoff.next(2), Duration::from_millis(400));
        assert_eq!(backoff.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_clamped_to_max() {
        assert_eq!(policy(100, 1_000, 2.0).next(10), Duration::from_secs(1));
        assert_eq!(policy(100, 1_000, 2.0).next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_factor() {
        let backoff = policy(500, 30_000, 1.0);
        assert!((0..10).all(|attempt| backoff.next(attempt) == Duration::from_millis(500)));
    }
}
