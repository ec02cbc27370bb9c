//! Bounded-retry controller with exponential backoff.
//!
//! `RetryPolicy` wraps a single fallible async operation: attempt 1 runs
//! immediately, each failure waits `base_delay * backoff_multiplier^(n-1)`
//! before attempt `n+1`, and the last error surfaces untouched once
//! `max_attempts` is reached. The policy does not classify errors —
//! validation failures must be raised before entering the controller, since
//! retrying a malformed request is never useful.
//!
//! An optional additive jitter (`0..=max_jitter`) desynchronises concurrent
//! retry loops. Jitter only ever lengthens a delay.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::defaults::RETRY_MAX_DELAY;

/// Retry shape for one operation: attempt bound, backoff curve, jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (clamped to at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound of the random additive jitter per delay (zero disables)
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_jitter: Duration::ZERO,
        }
    }

    /// Add random additive jitter to every backoff delay.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Deterministic backoff delay after `completed_attempt` has failed
    /// (1-based): `base_delay * backoff_multiplier^(completed_attempt - 1)`,
    /// capped at [`RETRY_MAX_DELAY`]. Jitter is not included here.
    pub fn backoff_delay(&self, completed_attempt: u32) -> Duration {
        let exponent = completed_attempt.saturating_sub(1).min(63);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        if !factor.is_finite() {
            return RETRY_MAX_DELAY;
        }
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= RETRY_MAX_DELAY.as_secs_f64() {
            RETRY_MAX_DELAY
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `operation` under this policy.
    ///
    /// Calls the operation at most `max_attempts` times and returns the
    /// error from the final attempt unmodified if every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, max_attempts, error = %err, "retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.backoff_delay(attempt) + self.jitter();
                    warn!(
                        attempt,
                        next_delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        use rand::Rng;
        let max_ms = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    #[error("attempt {0} failed")]
    struct AttemptError(u32);

    fn counting_op(
        calls: Arc<AtomicU32>,
        succeed_on: u32,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, AttemptError>> + Send>>
    {
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(AttemptError(n))
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_is_immediate() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
        let start = tokio::time::Instant::now();
        let result = policy.run(counting_op(Arc::clone(&calls), 1)).await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound_and_last_error_unmodified() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
        let result = policy.run(counting_op(Arc::clone(&calls), 99)).await;
        // Exactly 3 calls, and the error is the one from the final attempt
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(AttemptError(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timing_two_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
        let start = tokio::time::Instant::now();
        let result = policy.run(counting_op(Arc::clone(&calls), 3)).await;
        assert_eq!(result, Ok(3));
        // 100ms before attempt 2, 200ms before attempt 3
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_only_lengthens_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::from_millis(100), 2.0)
            .with_jitter(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let _ = policy.run(counting_op(Arc::clone(&calls), 2)).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(151));
    }

    #[test]
    fn test_backoff_delay_curve() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy::new(64, Duration::from_secs(10), 10.0);
        assert_eq!(policy.backoff_delay(40), RETRY_MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_clamps_to_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(0, Duration::from_millis(100), 2.0);
        let result = policy.run(counting_op(Arc::clone(&calls), 99)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(AttemptError(1)));
    }
}
