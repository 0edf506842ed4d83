//! Retry with exponential backoff around batch queries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::model::{BatchQuery, BatchResult};
use crate::traits::{ScanError, VulnerabilityDatabase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let scaled = (delay.as_millis() as f64 * self.backoff_multiplier) as u64;
        std::cmp::min(Duration::from_millis(scaled), self.max_delay())
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error,
/// or `max_attempts` is used up. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ScanError>>,
{
    retry_with_backoff_until(config, &CancellationToken::new(), operation).await
}

/// Like [`retry_with_backoff`], but a fired `cancel` token cuts the backoff
/// sleep short and returns [`ScanError::Cancelled`].
pub async fn retry_with_backoff_until<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ScanError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;
    let mut delay = config.initial_delay();

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempts >= max_attempts || !error.is_retryable() {
                    return Err(error);
                }

                tracing::debug!(
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying batch query"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempt = attempts, "Backoff interrupted by cancellation");
                        return Err(ScanError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Applies [`retry_with_backoff_until`] to every batch sent through `inner`.
pub struct RetryingDatabase<D> {
    inner: D,
    config: RetryConfig,
    cancel: CancellationToken,
}

impl<D> RetryingDatabase<D>
where
    D: VulnerabilityDatabase,
{
    pub fn new(inner: D, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops waiting between attempts once `token` fires. Pass the same
    /// token as the scan pipeline so an interrupt is not held up by backoff.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D> VulnerabilityDatabase for RetryingDatabase<D>
where
    D: VulnerabilityDatabase,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query_batch(&self, query: &BatchQuery) -> Result<BatchResult, ScanError> {
        retry_with_backoff_until(&self.config, &self.cancel, || self.inner.query_batch(query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
        };
        let d1 = config.next_delay(config.initial_delay());
        let d2 = config.next_delay(d1);
        assert_eq!(d1, Duration::from_millis(2000));
        assert_eq!(d2, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_config(3), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ScanError::Timeout { seconds: 1 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_config(2), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScanError::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ScanError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_config(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScanError::Decode("unexpected token".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ScanError::Decode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 30_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        };
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff_until(&config, &token, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScanError::Timeout { seconds: 1 })
            }
        })
        .await;

        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct AlwaysUnavailable {
        calls: AtomicU32,
    }

    #[async_trait]
    impl VulnerabilityDatabase for AlwaysUnavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        async fn query_batch(&self, _query: &BatchQuery) -> Result<BatchResult, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScanError::Status {
                status: 503,
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_retrying_database_honours_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let database = RetryingDatabase::new(
            AlwaysUnavailable {
                calls: AtomicU32::new(0),
            },
            RetryConfig {
                initial_delay_ms: 30_000,
                ..RetryConfig::default()
            },
        )
        .with_cancellation(token);

        let result = database.query_batch(&BatchQuery::default()).await;

        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert_eq!(database.inner().calls.load(Ordering::SeqCst), 1);
    }
}
