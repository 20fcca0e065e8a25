//! Retry utilities with exponential backoff and jitter
//!
//! Used by callers of the signing authority for `Unavailable` failures;
//! the authority itself never retries its backend.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Config for database operations
    pub fn database() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Config for calls to the signing authority (more patient)
    pub fn signing_authority() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter > 0.0 {
            let jitter_range = capped_delay * self.jitter;
            let mut rng = rand::thread_rng();
            let jitter_offset = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// A retry executor that runs operations with retry logic
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a new retry executor with the given config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an operation, retrying every failure up to `max_retries` times
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_predicate(operation, |_| true).await
    }

    /// Run an operation, retrying only failures for which `should_retry`
    /// returns true
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempts > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);

                    tracing::debug!(
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        "Retrying operation after failure"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Check if a database error is transient
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // Serialization failure, deadlock, connection exceptions,
            // operator intervention
            code == "40001" || code == "40P01" || code.starts_with("08") || code.starts_with("57")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation_without_jitter() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        // Caps at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
        });

        let count = attempt_count.clone();
        let result = retry
            .run(|| {
                let count = count.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        #[derive(Debug, PartialEq)]
        enum TestError {
            Retryable,
            Fatal,
        }

        let attempt_count = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
        });

        let count = attempt_count.clone();
        let result: Result<i32, TestError> = retry
            .run_with_predicate(
                || {
                    let count = count.clone();
                    async move {
                        if count.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(TestError::Retryable)
                        } else {
                            Err(TestError::Fatal)
                        }
                    }
                },
                |e| *e == TestError::Retryable,
            )
            .await;

        assert_eq!(result.unwrap_err(), TestError::Fatal);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let retry = Retry::new(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        });

        let result = retry.run(|| async { Err::<i32, _>("always fails") }).await;
        assert_eq!(result.unwrap_err(), "always fails");
    }
}
