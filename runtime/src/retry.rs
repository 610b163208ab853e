//! Exponential backoff for transient failures.
//!
//! Used in two places: re-publishing staged envelopes when the broker is
//! briefly unavailable, and re-running event handlers that failed with a
//! retryable error. Non-retryable errors (validation, conflicts, signature
//! mismatches) must fail immediately - retrying them would produce the same
//! result and delay dead-lettering.

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy: bounded attempts with exponentially growing delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries; useful for tests and for callers that
    /// want a single attempt through the same code path.
    #[must_use]
    pub const fn no_retries() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            multiplier: 1.0,
        }
    }

    /// Delay before the given retry attempt (0-based), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32)) as u64;
        let delay = Duration::from_millis(delay_ms);

        delay.min(self.max_delay)
    }
}

/// Retry an async operation, consulting `is_retryable` before each retry.
///
/// Returns the first non-retryable error immediately, or the last error once
/// the retry budget is exhausted.
///
/// # Errors
///
/// Propagates the operation's error as described above.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "error is not retryable, failing immediately");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "retry budget exhausted");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry an async operation treating every error as retryable.
///
/// # Errors
///
/// Returns the last error once the retry budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, operation, |_| true).await
}
