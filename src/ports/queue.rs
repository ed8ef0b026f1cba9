use crate::domain::jobs::JobRequest;
use async_trait::async_trait;
use std::error::Error;
use std::time::Duration;

/// FIFO hand-off between the dispatcher and the workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Fails once the queue has been closed.
    async fn push(&self, request: JobRequest) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Next request in submission order. With `wait == None` this blocks until
    /// a request arrives and only returns `Ok(None)` when the queue is closed
    /// and drained; otherwise `Ok(None)` also means the wait elapsed.
    async fn pop(
        &self,
        wait: Option<Duration>,
    ) -> Result<Option<JobRequest>, Box<dyn Error + Send + Sync>>;
}
