//! Bounded retry with exponential backoff for transient download failures.
//!
//! Whether a failure is retryable comes from its classified [`ErrorKind`]:
//! timeouts, server errors (5xx), and rate limiting (429) back off and try
//! again up to the attempt bound; everything else fails immediately.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::failure::ErrorKind;

/// Default maximum attempts, including the initial attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Decision on whether to retry a failed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^(attempt-1), max_delay) +
/// jitter`. With defaults the delays run roughly 1s, 2s before attempts run
/// out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is clamped to at
    /// least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt bound and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// The configured attempt bound.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt `attempt` (1-indexed, just failed with
    /// `kind`) should be retried.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_transient() {
            return RetryDecision::DoNotRetry {
                reason: format!("{} - permanent failure, retry would not help", kind.label()),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff delay for the retry after `attempt` failed.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 failed -> first retry waits base * multiplier^0.
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Random jitter in `0..=MAX_JITTER` so simultaneous failures don't
    /// retry in lockstep.
    #[allow(clippy::cast_possible_truncation, clippy::unused_self)]
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_max_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_transient_kinds_retry() {
        let policy = RetryPolicy::default();
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::HttpStatus(503),
            ErrorKind::HttpStatus(521),
            ErrorKind::HttpStatus(429),
        ] {
            let decision = policy.should_retry(kind, 1);
            assert!(
                matches!(decision, RetryDecision::Retry { attempt: 2, .. }),
                "{kind:?} should retry, got {decision:?}"
            );
        }
    }

    #[test]
    fn test_permanent_kinds_do_not_retry() {
        let policy = RetryPolicy::default();
        for kind in [
            ErrorKind::HttpStatus(404),
            ErrorKind::NoExtension,
            ErrorKind::PasswordProtected,
            ErrorKind::FailedLogin,
            ErrorKind::InvalidContentType,
            ErrorKind::Unknown,
        ] {
            let decision = policy.should_retry(kind, 1);
            assert!(
                matches!(decision, RetryDecision::DoNotRetry { .. }),
                "{kind:?} should not retry, got {decision:?}"
            );
        }
    }

    #[test]
    fn test_attempt_bound_is_respected() {
        let policy = RetryPolicy::with_max_attempts(3);

        assert!(matches!(
            policy.should_retry(ErrorKind::Timeout, 2),
            RetryDecision::Retry { .. }
        ));

        let decision = policy.should_retry(ErrorKind::Timeout, 3);
        let RetryDecision::DoNotRetry { reason } = decision else {
            panic!("attempt 3 of 3 must not retry");
        };
        assert!(reason.contains("exhausted"));
    }

    #[test]
    fn test_delays_grow_with_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);

        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1500));

        let second = policy.calculate_delay(2);
        assert!(second >= Duration::from_secs(2));
        assert!(second <= Duration::from_millis(2500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4));
        assert!(third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= MAX_JITTER);
        }
    }
}
