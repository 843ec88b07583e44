//! Retry and backoff logic for autobackup storage backends
//!
//! Storage backends wrap each remote call in [`with_policy`] and turn failures into
//! [`RetryError`]s with [`classify`]. Transient failures are retried after the policy's next
//! backoff interval until either the attempt limit or the backoff's elapsed-time budget runs
//! out.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed error carried by retry failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' gave up after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: BoxError,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: BoxError,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: BoxError,
    },
}

impl RetryError {
    /// Name of the operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            RetryError::MaxRetriesExceeded { operation, .. }
            | RetryError::Transient { operation, .. }
            | RetryError::Permanent { operation, .. } => operation,
        }
    }

    /// Consume the error, returning the underlying cause
    pub fn into_source(self) -> BoxError {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Attempt limit plus the backoff schedule between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least one attempt
    pub fn new(max_attempts: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Policy tuned for cloud object stores
    pub fn cloud_storage() -> Self {
        Self::new(5, cloud_storage_backoff_policy())
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

/// Execute an operation, retrying transient failures according to `policy`
///
/// The closure receives the 1-based attempt number. Permanent failures are returned
/// unchanged; exhausting the policy yields [`RetryError::MaxRetriesExceeded`] carrying the
/// last transient cause.
pub async fn with_policy<F, T>(op_name: &'static str, policy: RetryPolicy, mut f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let RetryPolicy {
        max_attempts,
        mut backoff,
    } = policy;
    backoff.reset();

    let mut attempt = 1;
    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempts = attempt, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(operation = op_name, attempt, error = %err, "Operation failed permanently");
                return Err(err);
            }
            Err(err) => {
                let delay = if attempt >= max_attempts {
                    None
                } else {
                    backoff.next_backoff()
                };

                let Some(delay) = delay else {
                    warn!(operation = op_name, attempt, error = %err, "Giving up on operation");
                    return Err(RetryError::MaxRetriesExceeded {
                        operation: op_name,
                        attempts: attempt,
                        source: err.into_source(),
                    });
                };

                warn!(
                    operation = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Backoff policy optimized for cloud storage operations
pub fn cloud_storage_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(60)))
        .with_multiplier(1.5)
        .build()
}

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Wrap an error as a [`RetryError`], classifying it through [`RetryableError`]
pub fn classify<E>(operation: &'static str, err: E) -> RetryError
where
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    if err.is_transient() {
        RetryError::Transient {
            operation,
            source: Box::new(err),
        }
    } else {
        RetryError::Permanent {
            operation,
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Error)]
    #[error("flaky: {0}")]
    struct Flaky(bool);

    impl RetryableError for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_elapsed_time(None)
            .build();
        RetryPolicy::new(max_attempts, backoff)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_operation() {
        let result = with_policy("test_op", fast_policy(3), |_attempt| Box::pin(async { Ok("success") })).await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = with_policy("test_op", RetryPolicy::cloud_storage(), move |_attempt| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if count < 2 {
                    Err(classify("test_op", Flaky(true)))
                } else {
                    Ok("success")
                }
            })
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result: RetryResult<&str> = with_policy("test_op", fast_policy(5), move |_attempt| {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(classify("test_op", Flaky(false))) })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_limit() {
        let result: RetryResult<()> = with_policy("test_op", fast_policy(4), |_attempt| {
            Box::pin(async {
                Err(RetryError::Transient {
                    operation: "test_op",
                    source: Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")),
                })
            })
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, source, .. }) => {
                assert_eq!(attempts, 4);
                assert!(source.to_string().contains("connection refused"));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_policy_clamps_attempts() {
        let policy = RetryPolicy::new(0, cloud_storage_backoff_policy());
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify("op", Flaky(true)), RetryError::Transient { .. }));
        let permanent = classify("op", Flaky(false));
        assert!(matches!(permanent, RetryError::Permanent { .. }));
        assert_eq!(permanent.operation(), "op");
    }
}
