use crate::application::orchestrator::{JobResult, PipelineOrchestrator};
use crate::domain::jobs::JobRequest;
use crate::ports::media::MediaEngine;
use crate::ports::queue::JobQueue;
use crate::ports::repository::JobRepository;
use crate::ports::storage::StoragePort;
use crate::ports::transcription::Transcriber;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Something that can take a job to a terminal state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: JobRequest) -> JobResult;
}

#[async_trait]
impl<S, M, T, R> JobRunner for PipelineOrchestrator<S, M, T, R>
where
    S: StoragePort,
    M: MediaEngine,
    T: Transcriber,
    R: JobRepository,
{
    async fn run(&self, request: JobRequest) -> JobResult {
        PipelineOrchestrator::run(self, request).await
    }
}

pub struct WorkerService<Q, J> {
    queue: Q,
    runner: Arc<J>,
}

impl<Q, J> WorkerService<Q, J>
where
    Q: JobQueue + 'static,
    J: JobRunner + 'static,
{
    pub fn new(queue: Q, runner: Arc<J>) -> Self {
        Self { queue, runner }
    }

    /// Take jobs off the queue one at a time until shutdown is requested or
    /// the queue closes. A job in hand is always finished first.
    pub async fn run_worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        info!(worker_id, "worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.queue.pop(None) => job,
            };

            match job {
                Ok(Some(request)) => {
                    info!(worker_id, key = %request.key, "picked up job");
                    let result = self.runner.run(request).await;
                    if result.succeeded() {
                        info!(worker_id, run_id = %result.state.run_id, "job succeeded");
                    } else {
                        warn!(
                            worker_id,
                            run_id = %result.state.run_id,
                            error = result.state.error.as_deref().unwrap_or("unknown"),
                            "job failed"
                        );
                    }
                }
                Ok(None) => {
                    info!(worker_id, "queue closed");
                    break;
                }
                Err(e) => {
                    error!(worker_id, error = %e, "queue error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!(worker_id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::queue::ChannelQueue;
    use crate::domain::jobs::{JobConfig, NaturalKey};
    use crate::domain::state::PipelineState;
    use std::path::Path;

    fn request(user: &str) -> JobRequest {
        JobRequest::new(NaturalKey::new("m", "1", user).unwrap())
    }

    fn finished(request: JobRequest) -> JobResult {
        let mut state = PipelineState::new(request.key.clone());
        state.finish(None);
        JobResult {
            config: JobConfig::derive(&request.key, Path::new("w"), Path::new("o")),
            state,
        }
    }

    #[tokio::test]
    async fn test_drains_queue_then_stops_when_closed() {
        let queue = ChannelQueue::new(4);
        queue.push(request("a")).await.unwrap();
        queue.push(request("b")).await.unwrap();
        queue.close().await;

        let mut runner = MockJobRunner::new();
        runner.expect_run().times(2).returning(finished);

        let worker = WorkerService::new(queue, Arc::new(runner));
        worker.run_worker_loop(0, CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_worker() {
        let queue = ChannelQueue::new(1);
        let mut runner = MockJobRunner::new();
        runner.expect_run().never();

        let shutdown = CancellationToken::new();
        let worker = Arc::new(WorkerService::new(queue, Arc::new(runner)));
        let handle = {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run_worker_loop(1, shutdown).await })
        };

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
