//! Retry with exponential backoff for transient provider errors.

use crate::context::{Created, Provider};
use crate::error::ProviderError;
use crate::types::Values;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry notifications.
pub trait RetryCallback: Send + Sync {
    /// Called before sleeping ahead of another attempt.
    ///
    /// # Arguments
    /// * `operation` - What is being retried, e.g. "create aws_vpc"
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: Duration,
    );
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: Duration,
    ) {
        log::warn!(
            "{operation}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {}ms",
            delay.as_millis()
        );
    }
}

/// Execute an operation, retrying transient errors.
///
/// Non-retryable errors are returned immediately; otherwise the last
/// error is returned once all attempts are used.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    operation_name: &str,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(operation_name, attempt + 1, max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Provider decorator that retries transient errors
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
    callback: Box<dyn RetryCallback>,
}

impl<P: Provider> RetryingProvider<P> {
    /// Wrap a provider; retries are logged.
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            callback: Box::new(LogCallback),
        }
    }

    /// Builder: replace the retry callback
    #[must_use]
    pub fn with_callback(mut self, callback: impl RetryCallback + 'static) -> Self {
        self.callback = Box::new(callback);
        self
    }

    /// The wrapped provider
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Provider> Provider for RetryingProvider<P> {
    fn create(&self, resource_type: &str, attributes: &Values) -> Result<Created, ProviderError> {
        let name = format!("create {resource_type}");
        with_retry(&self.config, &name, Some(self.callback.as_ref()), || {
            self.inner.create(resource_type, attributes)
        })
    }

    fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changed: &Values,
    ) -> Result<Values, ProviderError> {
        let name = format!("update {provider_id}");
        with_retry(&self.config, &name, Some(self.callback.as_ref()), || {
            self.inner.update(resource_type, provider_id, changed)
        })
    }

    fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        let name = format!("destroy {provider_id}");
        with_retry(&self.config, &name, Some(self.callback.as_ref()), || {
            self.inner.destroy(resource_type, provider_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_non_retryable_error_tried_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(5), "op", None, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::new(ErrorCategory::Invalid, "bad cidr"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_error_eventually_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast(3), "op", None, || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Arc<AtomicU32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: &str, _: u32, _: u32, _: &ProviderError, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = Counting(count.clone());
        let result: Result<(), _> = with_retry(&fast(3), "op", Some(&callback), || {
            Err(ProviderError::transient("timeout"))
        });
        assert!(result.is_err());
        // Not after the last attempt
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    struct Flaky {
        failures_left: AtomicU32,
    }

    impl Provider for Flaky {
        fn create(&self, _: &str, _: &Values) -> Result<Created, ProviderError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::transient("rate exceeded"));
            }
            Ok(Created {
                provider_id: "vpc-1".into(),
                outputs: Values::new(),
            })
        }

        fn update(&self, _: &str, _: &str, _: &Values) -> Result<Values, ProviderError> {
            Ok(Values::new())
        }

        fn destroy(&self, _: &str, _: &str) -> Result<(), ProviderError> {
            Err(ProviderError::new(ErrorCategory::NotFound, "gone"))
        }
    }

    #[test]
    fn test_retrying_provider_wraps_calls() {
        let provider = RetryingProvider::new(
            Flaky {
                failures_left: AtomicU32::new(2),
            },
            fast(3),
        );
        assert_eq!(provider.create("aws_vpc", &Values::new()).unwrap().provider_id, "vpc-1");
        assert_eq!(provider.inner().failures_left.load(Ordering::SeqCst), 0);
        let err = provider.destroy("aws_vpc", "vpc-1").unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }
}
