//! Backoff for jobs and record writes that fail transiently.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use tessera_common::{Error, Result};

/// How many times to retry and how long to wait in between.
///
/// Delays double from `initial_delay` and stop growing at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first call.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Spread each delay by up to 25% either way.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `retry` (1 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            delay.mul_f64(0.75 + rand::random::<f64>() * 0.5)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    /// Calls made, including the first.
    pub attempts: u32,
}

/// Runs an operation until it succeeds, fails for good, or runs out of retries.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Call `operation`, retrying the errors `retryable` accepts.
    pub async fn execute<F, Fut, T, R>(&self, mut operation: F, retryable: R) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: Fn(&Error) -> bool,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("Succeeded on attempt {}", attempts);
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(err) if attempts <= self.config.max_retries && retryable(&err) => {
                    let delay = self.config.backoff(attempts);
                    warn!("Attempt {} failed: {}. Retrying in {:?}", attempts, err, delay);
                    sleep(delay).await;
                }
                Err(err) => {
                    return Attempted {
                        result: Err(err),
                        attempts,
                    }
                }
            }
        }
    }
}
