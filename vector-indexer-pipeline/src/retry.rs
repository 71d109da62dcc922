//! Bounded, jittered exponential backoff around collaborator calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::ErrorCategory;
use vector_indexer_repository::ServiceError;

/// Retry configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound of a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Randomize delays between half and the full backoff.
    pub jitter: bool,
    /// Timeout applied to each attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: true,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// The last error of a call that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError {
    /// Error of the final attempt.
    pub error: ServiceError,
    /// Attempts made.
    pub attempts: u32,
}

impl RetryError {
    /// Whether the call gave up on a transient error.
    pub fn exhausted(&self) -> bool {
        self.error.is_transient()
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    pub fn delay(&self, category: ErrorCategory, retry: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(category.delay_factor())
            .saturating_mul(2u64.saturating_pow(retry));
        let capped = base.min(self.max_delay_ms);
        let delay_ms = if self.jitter && capped > 1 {
            rand::thread_rng().gen_range(capped / 2..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }

    /// Run `call` until it succeeds, fails permanently or the attempt cap is reached.
    ///
    /// Each attempt is bounded by `call_timeout`; an elapsed timeout is transient.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.call_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let category = ErrorCategory::of(&error);
            if category == ErrorCategory::Permanent || attempt >= max_attempts {
                return Err(RetryError {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.delay(category, attempt - 1);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            jitter: false,
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay(ErrorCategory::Transient, 0), Duration::from_millis(100));
        assert_eq!(policy.delay(ErrorCategory::Transient, 2), Duration::from_millis(400));
        assert_eq!(policy.delay(ErrorCategory::Transient, 10), Duration::from_millis(1000));
        assert_eq!(policy.delay(ErrorCategory::RateLimited, 0), Duration::from_millis(400));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..50 {
            let delay = policy.delay(ErrorCategory::Transient, 1).as_millis();
            assert!((100..=200).contains(&delay));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::unavailable("flaky"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::rate_limited("quota"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::invalid_request("bad"))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.error, ServiceError::Timeout(_)));
        assert_eq!(err.attempts, 3);
    }
}
