//! Bounded execution of provider calls.
//!
//! Every provider call the engine makes goes through [`WorkerPool::run`]:
//! - at most `max_concurrent` calls in flight, the rest wait for a permit
//! - each call gets the configured deadline (`Error::Timeout`)
//! - an optional cancellation token aborts the wait or the call (`Error::Cancelled`)

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use tessera_common::{Error, Result};

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub timeouts: u64,
    pub cancellations: u64,
}

/// Semaphore-bounded runner for provider operations.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig, timeout: Duration) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
            timeouts: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
        }
    }

    /// Run `operation` once a permit is free.
    ///
    /// When cancelled or timed out the operation future is dropped, so the
    /// caller must not assume any of its side effects either happened or
    /// did not.
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` fires first
    /// - `Timeout` if the operation outlives the deadline
    /// - whatever the operation returns
    pub async fn run<T, F>(
        &self,
        operation: &str,
        cancel: Option<&CancellationToken>,
        future: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(self.cancelled(operation)),
            permit = self.semaphore.acquire() => permit
                .map_err(|_| Error::Cancelled(format!("{}: worker pool closed", operation)))?,
        };

        debug!("Running {} ({} permits left)", operation, self.semaphore.available_permits());
        let guarded = tokio::time::timeout(self.timeout, future);

        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(self.cancelled(operation)),
            result = guarded => match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!("{} timed out after {:?}", operation, self.timeout);
                    Err(Error::Timeout(format!(
                        "{} exceeded {:?}",
                        operation, self.timeout
                    )))
                }
            },
        }
    }

    fn cancelled(&self, operation: &str) -> Error {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        debug!("{} cancelled", operation);
        Error::Cancelled(operation.to_string())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrent: self.max_concurrent,
            in_flight: self.max_concurrent - self.semaphore.available_permits(),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }

    /// Operation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
