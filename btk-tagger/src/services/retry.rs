//! Retry Logic
//!
//! One combinator for every remote call: a fixed ceiling of attempts with a
//! fixed delay between them. Only errors the caller classifies as retryable
//! are retried; anything else is returned immediately.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt ceiling and delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 11,
            delay: Duration::from_secs(5),
        }
    }
}

/// Sleep unless cancelled first; returns `false` when cancelled
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt ceiling is reached.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If `is_retryable(err)` and attempts remain: log WARN, sleep, retry
/// 4. Otherwise return the error (the last one when exhausted)
///
/// Cancellation interrupts the delay and returns the last error.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "danbooru md5 lookup")
/// * `policy` - Attempt ceiling and delay
/// * `cancel` - Run cancellation token
/// * `is_retryable` - Error classifier
/// * `operation` - Async closure performing one attempt
pub async fn with_retry<F, Fut, T, E, C>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed: retry attempts exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after delay"
                );

                if !cancellable_sleep(policy.delay, cancel).await {
                    tracing::debug!(operation = operation_name, attempt, "Retry interrupted by cancellation");
                    return Err(err);
                }
            }
        }
    }
}
