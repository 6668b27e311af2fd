//! Fixed-interval bounded retry.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::domain::cancellation::CancellationSignal;
use crate::domain::errors::{LoadError, LoadResult};

/// Retry policy: a bounded attempt count with a fixed interval between
/// attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the initial one included. Clamped to at least 1.
    pub attempts: u32,
    /// Fixed delay before each attempt after the first.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_millis(500),
        }
    }
}

/// Runs `operation` under the policy.
///
/// Cancellation and non-retriable failures are returned immediately.
/// When every attempt fails with a retriable error, the failures are
/// aggregated into one [`LoadError::AttemptsExhausted`].
///
/// # Errors
/// See above.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    signal: &CancellationSignal,
    mut operation: F,
) -> LoadResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = LoadResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut failures: Vec<String> = Vec::new();

    for attempt in 0..attempts {
        if signal.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        if attempt > 0 {
            tokio::select! {
                () = tokio::time::sleep(policy.interval) => {}
                () = signal.cancelled() => return Err(LoadError::Cancelled),
            }
        }
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) if !err.is_retriable() => return Err(err),
            Err(err) => {
                debug!(attempt = attempt + 1, error = %err, "attempt failed");
                failures.push(format!("attempt {}: {err}", attempt + 1));
            }
        }
    }

    Err(LoadError::AttemptsExhausted {
        attempts,
        summary: failures.join("; "),
    })
}
