//! Retry utilities with exponential backoff.
//!
//! The agent loop's turn bound and this retry policy are independent
//! counters: `continue` re-enters the inner loop without consuming a turn
//! just because a request was retried.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior. Defaults: base 2000ms, max 60000ms,
/// 3 attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Random jitter applied to the computed delay (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(60000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// `min(base * 2^(attempt-1), max)` plus symmetric jitter.
    /// `attempt` is zero-based here (attempt 0 is the delay before the
    /// second overall try).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Delay before retry attempt honoring a provider-supplied `Retry-After`
    /// when present (e.g. from [`Error::RateLimited`]), else the computed
    /// backoff delay.
    fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => self.calculate_delay(attempt),
        }
    }
}

/// Retry an async operation with exponential backoff, unconditionally.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let retry_after = err.retry_after_secs();
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.delay_for(attempt, retry_after)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry failed with no error")))
}

/// Retry only when [`Error::is_retryable`] holds, per the §7 error-kind
/// classifier. Returns the first non-retryable error immediately.
pub async fn retry_with_backoff_conditional<F, Fut, T>(config: RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                let retry_after = err.retry_after_secs();
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.delay_for(attempt, retry_after)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0);

        let delay0 = config.calculate_delay(0);
        let delay1 = config.calculate_delay(1);
        let delay2 = config.calculate_delay(2);

        assert!(delay1 > delay0);
        assert!(delay2 > delay1);
    }

    #[test]
    fn delay_respects_retry_after() {
        let config = RetryConfig::new();
        assert_eq!(config.delay_for(0, Some(7)), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn retry_success_on_first_attempt() {
        let config = RetryConfig::new().with_max_attempts(3);
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i32, Error>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_success_after_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1));
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(config, move || {
            let count = count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(Error::Timeout)
                } else {
                    Ok::<i32, Error>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1));
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::Timeout) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conditional_retry_stops_on_non_retryable() {
        let config = RetryConfig::new().with_max_attempts(3);
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff_conditional(config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::InvalidInput("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
