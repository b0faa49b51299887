//! Retry logic for external API calls
//!
//! Retry policies are plain values handed to a generic helper; each client
//! passes its own attempt limit and backoff curve.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::warn;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create an ExponentialBackoff from this policy.
    ///
    /// The default randomization factor keeps jitter on, and the elapsed-time
    /// cap bounds a whole call, retries included, at two minutes.
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Only errors for which `is_transient` returns true are retried; permanent
/// errors are returned immediately.
pub async fn retry_async<T, E, Fut, F, P>(
    operation: F,
    policy: &RetryPolicy,
    is_transient: P,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut backoff = policy.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_transient(&e) {
                    return Err(e);
                }

                if attempts >= policy.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = duration.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: true })
            },
            &fast_policy(),
            |e: &TestError| e.transient,
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: false })
            },
            &fast_policy(),
            |e: &TestError| e.transient,
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_async(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError { transient: true })
                } else {
                    Ok(n)
                }
            },
            &fast_policy(),
            |e: &TestError| e.transient,
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
