//! # Retry With Backoff
//!
//! Bounded exponential-delay retry wrapper. Composition order with the
//! circuit breaker is fixed: retry wraps the breaker call, so every attempt
//! re-checks breaker state and a circuit that opens mid-sequence fails fast
//! instead of sleeping through the remaining attempts.

use crate::stages::StageServiceError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry tuning. Attempt `i` (1-indexed) that fails waits
/// `base_delay * 2^(i-1)` before attempt `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after failed attempt `attempt` (1-indexed)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Errors that can short-circuit a retry sequence.
///
/// Breaker rejections and invalid input both return `false`: sleeping and
/// retrying cannot help either, and a rejection must surface immediately so
/// the caller can take the error-queue path.
pub trait Recoverable {
    fn is_retryable(&self) -> bool;
}

impl<E: Recoverable> Recoverable for super::circuit_breaker::BreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            super::circuit_breaker::BreakerError::CircuitOpen { .. } => false,
            super::circuit_breaker::BreakerError::Operation(e) => e.is_retryable(),
        }
    }
}

impl Recoverable for StageServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, StageServiceError::Transient { .. })
    }
}

/// Attempt `operation` up to `policy.max_attempts` times, sleeping the
/// exponential backoff between attempts. Non-retryable errors and exhaustion
/// re-raise the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Recoverable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    debug!(attempt, error = %error, "Not retryable, giving up");
                    return Err(error);
                }
                if attempt == max_attempts {
                    warn!(attempt, error = %error, "Retry budget exhausted");
                    return Err(error);
                }

                let delay = policy.backoff_after(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
    use crate::resilience::config::BreakerSettings;
    use crate::stages::StageKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(quick_policy(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StageServiceError::transient(
                        StageKind::Translation,
                        "flaky",
                    ))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reraises_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(quick_policy(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StageServiceError::transient(StageKind::Rendering, "down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_input_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(quick_policy(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StageServiceError::invalid_input(
                    StageKind::Recognition,
                    "missing file",
                ))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opening_mid_sequence_fails_fast() {
        let breaker = CircuitBreaker::new(
            StageKind::Translation,
            BreakerSettings {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(30),
                half_open_success_threshold: 1,
                monitor_interval: Duration::from_secs(5),
            },
        );

        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
            },
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                breaker.execute(|| async {
                    Err::<(), _>(StageServiceError::transient(
                        StageKind::Translation,
                        "down",
                    ))
                })
            },
        )
        .await;

        // Two real failures open the circuit; the third attempt is rejected
        // without delegation and ends the sequence early.
        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().total_calls, 2);
    }
}
