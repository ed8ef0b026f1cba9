use crate::ports::storage::StorageError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts and linear backoff for storage transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

#[derive(Debug)]
pub struct TransferFailure {
    pub attempts: u32,
    pub source: StorageError,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or the budget is spent. A missing object is
    /// not retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TransferFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err @ StorageError::NotFound(_)) => {
                    return Err(TransferFailure {
                        attempts: attempt,
                        source: err,
                    })
                }
                Err(err) if attempt >= self.attempts => {
                    return Err(TransferFailure {
                        attempts: attempt,
                        source: err,
                    })
                }
                Err(err) => {
                    warn!(what, attempt, error = %err, "transfer failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
