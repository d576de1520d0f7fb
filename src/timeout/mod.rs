//! Per-attempt deadlines.
//!
//! [`with_timeout`] races an operation against a timer. Expiry drops the
//! operation's future, cancelling only that attempt.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Default deadline for a single streaming generation attempt.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// An operation did not finish before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} timed out after {}ms", .duration.as_millis())]
pub struct TimeoutError {
    /// Human-readable name of the operation that timed out.
    pub operation: String,
    /// The deadline that was exceeded.
    pub duration: Duration,
}

/// Runs `future` with a deadline.
///
/// # Errors
/// Returns [`TimeoutError`] naming `operation` when `duration` elapses first.
pub async fn with_timeout<F>(
    operation: impl Into<String>,
    duration: Duration,
    future: F,
) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError {
            operation: operation.into(),
            duration,
        })
}
