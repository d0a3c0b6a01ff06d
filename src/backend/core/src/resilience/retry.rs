//! Retry with exponential backoff, jitter, and circuit breaker integration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::circuit_breaker::{BreakerMetrics, CircuitBreaker};
use crate::error::{ErrorCode, Result};
use crate::util::rand_unit;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial try
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Jitter fraction (0-1); the delay is perturbed uniformly by
    /// `[-jitter, +jitter] * delay`
    pub jitter: f64,
    /// Error codes that are retried. `None` retries every failure except
    /// `CircuitOpen`, which is never retried.
    pub retry_on: Option<Vec<ErrorCode>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.1,
            retry_on: None,
        }
    }
}

impl RetryConfig {
    /// A config that retries only transient upstream conditions
    /// (rate limiting, 5xx, network errors, timeouts).
    pub fn transient() -> Self {
        Self {
            retry_on: Some(vec![
                ErrorCode::UpstreamRateLimited,
                ErrorCode::UpstreamUnavailable,
                ErrorCode::NetworkError,
                ErrorCode::Timeout,
            ]),
            ..Default::default()
        }
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay bounds.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }
}

#[derive(Debug, Default)]
struct RetryStats {
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    /// Calls that succeeded only after at least one retry
    retried_calls: u64,
    total_retries: u64,
}

/// Retry manager with configurable backoff and optional breaker delegation.
pub struct RetryManager {
    config: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    stats: Mutex<RetryStats>,
}

impl RetryManager {
    /// Create a new retry manager.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            breaker: None,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Delegate admission control to a circuit breaker. Rejections from the
    /// breaker propagate immediately and never consume retry budget.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Execute a call, retrying transient failures with exponential backoff.
    ///
    /// The wrapped function is invoked `1 + min(attempts_until_success,
    /// max_retries)` times; after exhaustion the last failure propagates
    /// unchanged.
    pub async fn execute<F, Fut, T>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.lock().total_calls += 1;

        let mut retries: u32 = 0;

        loop {
            let attempt = match &self.breaker {
                Some(breaker) => breaker.execute(&mut call).await,
                None => call().await,
            };

            match attempt {
                Ok(value) => {
                    let mut stats = self.stats.lock();
                    stats.successful_calls += 1;
                    if retries > 0 {
                        stats.retried_calls += 1;
                    }
                    return Ok(value);
                }
                Err(err) if err.code() == ErrorCode::CircuitOpen => {
                    // The dependency is gated off; retrying would only burn
                    // budget against a closed door.
                    self.stats.lock().failed_calls += 1;
                    return Err(err);
                }
                Err(err) => {
                    if let Some(retry_on) = &self.config.retry_on {
                        if !retry_on.contains(&err.code()) {
                            self.stats.lock().failed_calls += 1;
                            return Err(err);
                        }
                    }

                    retries += 1;
                    self.stats.lock().total_retries += 1;

                    if retries > self.config.max_retries {
                        self.stats.lock().failed_calls += 1;
                        tracing::error!(
                            max_retries = self.config.max_retries,
                            code = %err.code(),
                            "Max retries exceeded: {}",
                            err.user_message()
                        );
                        return Err(err);
                    }

                    let delay = self.backoff_delay(retries);
                    tracing::info!(
                        retry = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        code = %err.code(),
                        "Retrying after failure: {}",
                        err.user_message()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delay for the n-th retry (1-indexed): exponential, capped, jittered.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = self.config.base_delay.as_secs_f64()
            * self.config.backoff_factor.powi(retry as i32 - 1);
        let capped = exp.min(self.config.max_delay.as_secs_f64());
        let jitter = (rand_unit() * 2.0 - 1.0) * self.config.jitter * capped;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// Get retry metrics.
    pub fn metrics(&self) -> RetryMetrics {
        let stats = self.stats.lock();
        let total = stats.total_calls.max(1) as f64;
        RetryMetrics {
            total_calls: stats.total_calls,
            successful_calls: stats.successful_calls,
            failed_calls: stats.failed_calls,
            retried_calls: stats.retried_calls,
            total_retries: stats.total_retries,
            success_rate: (stats.successful_calls as f64 / total) * 100.0,
            retry_rate: (stats.retried_calls as f64 / total) * 100.0,
            avg_retries_per_call: stats.total_retries as f64 / total,
            circuit_breaker: self.breaker.as_ref().map(|b| b.metrics()),
        }
    }
}

/// Metrics snapshot for a retry manager.
#[derive(Debug, Clone, Serialize)]
pub struct RetryMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retried_calls: u64,
    pub total_retries: u64,
    pub success_rate: f64,
    pub retry_rate: f64,
    pub avg_retries_per_call: f64,
    /// Metrics of the integrated breaker, if one is attached
    pub circuit_breaker: Option<BreakerMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::resilience::circuit_breaker::BreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: 0.0,
            retry_on: None,
        }
    }

    fn transient_err() -> CoreError {
        CoreError::new(ErrorCode::UpstreamUnavailable, "upstream down")
    }

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let manager = RetryManager::new(fast_config(3));
        let calls = AtomicU32::new(0);

        let result = manager
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = manager.metrics();
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.retried_calls, 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let manager = RetryManager::new(fast_config(5));
        let calls = AtomicU32::new(0);

        let result = manager
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(transient_err())
                } else {
                    Ok("recovered")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3); // 1 + 2 retries

        let metrics = manager.metrics();
        assert_eq!(metrics.retried_calls, 1);
        assert_eq!(metrics.total_retries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_propagates_original_error() {
        let manager = RetryManager::new(fast_config(2));
        let calls = AtomicU32::new(0);

        let result: Result<()> = manager
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::new(ErrorCode::NetworkError, "connection reset"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetworkError);
        assert_eq!(err.user_message(), "connection reset");
        // Initial try plus max_retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_code_propagates_immediately() {
        let manager = RetryManager::new(RetryConfig {
            retry_on: Some(vec![ErrorCode::UpstreamRateLimited]),
            ..fast_config(5)
        });
        let calls = AtomicU32::new(0);

        let result: Result<()> = manager
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::new(ErrorCode::UpstreamRejected, "bad field"))
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::UpstreamRejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_open_is_never_retried() {
        let breaker = Arc::new(CircuitBreaker::new(
            "dep",
            BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));
        breaker.record_failure(); // breaker now open

        let manager = RetryManager::new(fast_config(5)).with_circuit_breaker(breaker);
        let calls = AtomicU32::new(0);

        let result: Result<()> = manager
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let metrics = manager.metrics();
        assert_eq!(metrics.total_retries, 0);
        assert_eq!(metrics.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_breaker_counts_failures_through_retries() {
        let breaker = Arc::new(CircuitBreaker::new(
            "dep",
            BreakerConfig {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));

        let manager =
            RetryManager::new(fast_config(2)).with_circuit_breaker(breaker.clone());

        let _: Result<()> = manager.execute(|| async { Err(transient_err()) }).await;

        // Each attempt (1 + 2 retries) was counted by the breaker
        let metrics = breaker.metrics();
        assert_eq!(metrics.failed_calls, 3);
        assert_eq!(metrics.total_calls, 3);
    }

    #[test]
    fn test_backoff_delay_schedule() {
        let manager = RetryManager::new(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.0,
            retry_on: None,
        });

        assert_eq!(manager.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(manager.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(manager.backoff_delay(3), Duration::from_secs(4));
        // Capped at max_delay
        assert_eq!(manager.backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let manager = RetryManager::new(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.1,
            retry_on: None,
        });

        for _ in 0..50 {
            let d = manager.backoff_delay(3).as_secs_f64();
            assert!((3.6..=4.4).contains(&d), "delay {} out of jitter bounds", d);
        }
    }
}
