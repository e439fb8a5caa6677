//! Bounded-concurrency bulk execution.
//!
//! Every item runs as its own future on the calling task, gated by a
//! counting semaphore. A failing item never stops the others: failures are
//! collected and reported together once every item has finished.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::{AggregateBulkError, BulkFailure, RepoError, RepoResult, RepositoryConfig};
use domain::{Document, DEFAULT_MAX_CONCURRENCY};

use crate::retry::RetryPolicy;

/// Tuning for one bulk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    /// Items allowed in flight at once
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl BulkOptions {
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.retry = RetryPolicy::new(max_retries, base_delay);
        self
    }
}

/// Runs one operation per item with bounded parallelism and throttle retries.
#[derive(Debug, Clone, Default)]
pub struct BulkOperationCoordinator {
    options: BulkOptions,
}

impl BulkOperationCoordinator {
    pub fn new(options: BulkOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Apply `op` to every item.
    ///
    /// Returns `Ok(())` only when every item succeeded. Otherwise the error
    /// is `RepoError::AggregateBulk` naming each failed item, including
    /// items that were cancelled before or during their run.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, op: F, cancel: &CancellationToken) -> RepoResult<()>
    where
        T: Document,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = RepoResult<()>> + Send,
    {
        if items.is_empty() {
            return Ok(());
        }

        let total = items.len();
        let semaphore = Semaphore::new(self.options.max_concurrency.max(1));
        let failures: Mutex<Vec<BulkFailure>> = Mutex::new(Vec::new());

        debug!(
            items = total,
            max_concurrency = self.options.max_concurrency,
            "Starting bulk operation"
        );

        let tasks = items.into_iter().map(|item| {
            let semaphore = &semaphore;
            let failures = &failures;
            let op = &op;

            async move {
                if let Err(error) = self.run_one(&item, op, semaphore, cancel).await {
                    failures.lock().await.push(BulkFailure {
                        item: item.identity().clone(),
                        error,
                    });
                }
            }
        });
        join_all(tasks).await;

        let failures = failures.into_inner();
        if failures.is_empty() {
            debug!(items = total, "Bulk operation completed");
            return Ok(());
        }

        warn!(items = total, failed = failures.len(), "Bulk operation completed with failures");
        Err(AggregateBulkError::new(failures).into())
    }

    async fn run_one<T, F, Fut>(
        &self,
        item: &T,
        op: &F,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> RepoResult<()>
    where
        T: Document,
        F: Fn(T) -> Fut,
        Fut: Future<Output = RepoResult<()>>,
    {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RepoError::Cancelled),
            permit = semaphore.acquire() => permit.map_err(|_| RepoError::Cancelled)?,
        };

        self.options
            .retry
            .execute(cancel, || op(item.clone()))
            .await
    }
}
