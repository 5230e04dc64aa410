// Retry Policy
// One backoff/classification policy shared by the monitor enqueue path and
// the queue worker dequeue path

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Errors that can tell the retry loop whether another attempt makes sense.
/// Transient infrastructure failures are retried; everything else propagates
/// immediately.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay: min(base * 2^(attempt-1), max).
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_backoff)
    }

    /// Full delay including uniform jitter in [0, base).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = self.base_backoff.mul_f64(fastrand::f64());
        self.capped_delay(attempt) + jitter
    }
}

/// Run an operation with bounded retries on transient failures.
///
/// Required operations (`suppress_errors == false`) return the last error
/// once attempts are exhausted. Best-effort operations log a warning and
/// return `Ok(None)` instead. Non-transient errors propagate immediately
/// unless suppressed.
pub async fn execute_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    suppress_errors: bool,
    mut op: F,
) -> Result<Option<T>, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(Some(value)),
            Err(err) if err.is_transient() => {
                if attempt >= policy.max_attempts {
                    if suppress_errors {
                        warn!(
                            "Operation {} failed after {} attempts: {}",
                            operation, attempt, err
                        );
                        return Ok(None);
                    }
                    return Err(err);
                }
                let delay = policy.backoff_delay(attempt);
                debug!(
                    "Retryable error during {} (attempt {}/{}): {}. Sleeping {:.2}s",
                    operation,
                    attempt,
                    policy.max_attempts,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if suppress_errors {
                    warn!("Non-retryable error during {}: {}", operation, err);
                    return Ok(None);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[test]
    fn delay_is_monotonic_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..=5 {
            let delay = policy.capped_delay(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
        // attempt 5 is capped: 2 * 2^4 = 32 > 30
        assert_eq!(policy.capped_delay(5), Duration::from_secs(30));
        // jittered delay never exceeds cap + base
        for _ in 0..50 {
            assert!(policy.backoff_delay(5) <= Duration::from_secs(32));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);
        let result: Result<Option<()>, TestError> =
            execute_with_backoff(&policy, "test_op", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { transient: true }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_operation_swallows_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let result: Result<Option<()>, TestError> =
            execute_with_backoff(&policy, "best_effort", true, || async {
                Err(TestError { transient: true })
            })
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn fatal_error_propagates_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<Option<()>, TestError> =
            execute_with_backoff(&policy, "fatal_op", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { transient: false }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
