//! Retry policy for transient oracle failures
//!
//! A retry repeats the same call with the same input; it never advances a
//! candidate's correction attempt.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use factorforge_common::ForgeError;

/// Linear backoff: the n-th retry waits `n * backoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(crate::DEFAULT_ORACLE_RETRIES)
    }
}

impl RetryPolicy {
    pub fn linear(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(crate::ORACLE_RETRY_BACKOFF_MS),
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::linear(0)
    }

    /// Run `call` until it succeeds, fails permanently, or the retries are
    /// used up
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ForgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ForgeError>>,
    {
        let mut retries = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    warn!(operation, error = %err, retries, "Retrying oracle call");
                    tokio::time::sleep(self.backoff * retries).await;
                }
                Err(err) => {
                    error!(operation, error = %err, retries, "Oracle call failed");
                    return Err(err);
                }
            }
        }
    }
}
