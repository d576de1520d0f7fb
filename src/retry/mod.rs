//! Retry with exponential backoff.
//!
//! [`retry`] invokes an async operation up to `max_attempts + 1` times,
//! sleeping between attempts according to a [`RetryPolicy`]. A predicate is
//! consulted before every retry; when it declines, the error is returned
//! immediately. When attempts run out, the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry behavior with exponential backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay cap for any retry.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Percentage of jitter to apply to delays (0-100).
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_percent: 0,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy without jitter.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter_percent: 0,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Sets the jitter percentage, clamped to 100.
    pub fn with_jitter(mut self, jitter_percent: u8) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    /// Total number of times the operation may run.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Delay to sleep after the given failed attempt (1-based).
    ///
    /// `min(initial_delay * backoff_multiplier^(attempt - 1), max_delay)`,
    /// then adjusted by jitter if configured. A multiplier below 1 is treated
    /// as 1 so delays never shrink; loaded configuration rejects such values.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let initial_ms = self.initial_delay.as_millis() as f64;
        let raw_ms = initial_ms * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_ms * f64::from(self.jitter_percent) / 100.0;
        let final_ms = (capped_ms + self.deterministic_jitter(attempt, jitter_range)).max(0.0);
        Duration::from_millis(final_ms.round() as u64)
    }

    /// Alternating, attempt-dependent jitter so delays stay reproducible.
    fn deterministic_jitter(&self, attempt: u32, jitter_range: f64) -> f64 {
        let sign = if attempt % 2 == 0 { 1.0 } else { -1.0 };
        let factor = (f64::from(attempt % 5) + 1.0) / 5.0;
        jitter_range * sign * factor
    }
}

/// Runs `operation` until it succeeds, `should_retry` declines, or the
/// policy's attempts are exhausted.
///
/// The operation receives the 1-based attempt number.
///
/// # Errors
/// Returns the error of the last attempt, unmodified.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let total = policy.total_attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= total {
                    tracing::debug!(attempt, "retry attempts exhausted: {}", error);
                    return Err(error);
                }
                if !should_retry(&error) {
                    tracing::debug!(attempt, "error is not retryable: {}", error);
                    return Err(error);
                }
                let delay = policy.calculate_delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = total,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying: {}",
                    error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn policy_100ms() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10), 2.0)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.total_attempts(), 4);
    }

    #[test]
    fn test_calculate_delay_exponential_growth() {
        let policy = policy_100ms();
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_calculate_delay_capped_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 3.0);
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(3));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(60), Duration::from_secs(5));
    }

    #[test]
    fn test_multiplier_below_one_never_shrinks_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_secs(10), 0.5);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let policy = policy_100ms().with_jitter(10);
        for attempt in 1..=4 {
            let base = policy_100ms().calculate_delay(attempt).as_millis() as f64;
            let jittered = policy.calculate_delay(attempt).as_millis() as f64;
            assert!((jittered - base).abs() <= base * 0.1 + 1.0);
        }
        assert_eq!(RetryPolicy::default().with_jitter(250).jitter_percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_retryable_runs_max_plus_one_with_backoff() {
        let policy = policy_100ms();
        let started = Instant::now();
        let stamps = Mutex::new(Vec::new());

        let result: Result<(), String> = retry(
            &policy,
            |_attempt| {
                stamps.lock().unwrap().push(started.elapsed());
                async { Err("ECONNRESET".to_string()) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("ECONNRESET".to_string()));
        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<u128> = stamps.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![100, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_false_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(
            &policy_100ms(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("401 Unauthorized".to_string()) }
            },
            |_| false,
        )
        .await;

        assert_eq!(result, Err("401 Unauthorized".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let result = retry(
            &policy_100ms(),
            |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {} failed", attempt))
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_returned_unmodified() {
        let result: Result<(), String> = retry(
            &RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1), 2.0),
            |attempt| async move { Err(format!("failure #{}", attempt)) },
            |_| true,
        )
        .await;
        assert_eq!(result, Err("failure #3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = retry(
            &RetryPolicy::none(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("503".to_string()) }
            },
            |_| true,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_deserializes_millis() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 5, "initial_delay_ms": 250, "max_delay_ms": 4000, "backoff_multiplier": 1.5}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(4000));
        assert_eq!(policy.jitter_percent, 0);
    }
}
