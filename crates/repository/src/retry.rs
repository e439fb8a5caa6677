//! Throttle-aware retry for single-item operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use common::{RepoError, RepoResult, RepositoryConfig};
use domain::{DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_RETRIES};

/// Retry budget and backoff for throttled operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_backoff_ms))
    }

    /// Exponential backoff: `base_delay * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before the next attempt: the store's hint when present,
    /// otherwise exponential backoff.
    pub fn delay_for(&self, error: &RepoError, attempt: u32) -> Duration {
        error.retry_after().unwrap_or_else(|| self.backoff(attempt))
    }

    /// Run `op`, retrying throttled failures up to `max_retries` times.
    ///
    /// Other errors return immediately. Cancellation interrupts the backoff
    /// wait and yields `RepoError::Cancelled`.
    pub async fn execute<F, Fut, T>(&self, cancel: &CancellationToken, mut op: F) -> RepoResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RepoResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_throttled() && attempt < self.max_retries => {
                    let delay = self.delay_for(&e, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Throttled by store, retrying"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RepoError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
