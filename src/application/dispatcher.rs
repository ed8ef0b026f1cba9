use crate::application::errors::SubmitError;
use crate::config::PipelineSettings;
use crate::domain::jobs::{JobConfig, JobRequest, JobSubmission, NaturalKey};
use crate::domain::state::PipelineState;
use crate::ports::queue::JobQueue;
use crate::ports::repository::JobRepository;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Returned to the submitter once a job is queued.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub run_id: Uuid,
    pub request: JobRequest,
    pub config: JobConfig,
}

/// Validates submissions, claims their natural key and queues them for the
/// workers. Never runs a job itself.
pub struct JobDispatcher<Q, R> {
    queue: Q,
    repo: R,
    local_root: PathBuf,
    output_root: PathBuf,
}

impl<Q, R> JobDispatcher<Q, R>
where
    Q: JobQueue,
    R: JobRepository,
{
    pub fn new(queue: Q, repo: R, settings: &PipelineSettings) -> Self {
        Self {
            queue,
            repo,
            local_root: settings.local_root.clone(),
            output_root: settings.output_root.clone(),
        }
    }

    pub async fn submit_raw(&self, submission: JobSubmission) -> Result<Accepted, SubmitError> {
        let request = submission.validate()?;
        self.submit(request).await
    }

    pub async fn submit(&self, request: JobRequest) -> Result<Accepted, SubmitError> {
        let config = JobConfig::derive(&request.key, &self.local_root, &self.output_root);
        let mut state = PipelineState::new(request.key.clone());

        let claimed = self
            .repo
            .try_claim(&state)
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))?;
        if !claimed {
            return Err(SubmitError::AlreadyRunning(request.key));
        }

        if let Err(e) = self.queue.push(request.clone()).await {
            warn!(key = %request.key, error = %e, "failed to enqueue job");
            // Release the claim so the key can be submitted again.
            state.finish(Some(format!("failed to enqueue: {e}")));
            if let Err(e) = self.repo.save(&state).await {
                warn!(key = %request.key, error = %e, "failed to release job claim");
            }
            return Err(SubmitError::QueueClosed);
        }

        info!(run_id = %state.run_id, key = %request.key, "job queued");
        Ok(Accepted {
            run_id: state.run_id,
            request,
            config,
        })
    }

    pub async fn status(&self, key: &NaturalKey) -> Result<Option<PipelineState>, SubmitError> {
        self.repo
            .get(key)
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))
    }

    /// Take every request still waiting in the queue and mark its pending
    /// record failed. Used on shutdown once the workers have stopped.
    pub async fn abandon_queued(&self) -> usize {
        let mut abandoned = 0;
        while let Ok(Some(request)) = self.queue.pop(Some(Duration::ZERO)).await {
            abandoned += 1;
            let mut state = match self.repo.get(&request.key).await {
                Ok(Some(state)) if !state.is_terminal() => state,
                Ok(_) => continue,
                Err(e) => {
                    warn!(key = %request.key, error = %e, "could not read job store");
                    continue;
                }
            };
            state.finish(Some("service stopped before the job started".to_string()));
            if let Err(e) = self.repo.save(&state).await {
                warn!(key = %request.key, error = %e, "failed to record abandoned job");
            } else {
                warn!(run_id = %state.run_id, key = %request.key, "queued job abandoned");
            }
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::memory::InMemoryJobRepository;
    use crate::adapters::local::queue::ChannelQueue;
    use crate::domain::jobs::ValidationError;
    use crate::domain::state::Stage;
    use crate::ports::queue::MockJobQueue;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            local_root: PathBuf::from("/work"),
            output_root: PathBuf::from("/out"),
            ..PipelineSettings::default()
        }
    }

    fn submission() -> JobSubmission {
        JobSubmission {
            meeting_id: Some("m1".into()),
            take: Some("1".into()),
            user_id: Some("u1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_queues_and_records_pending() {
        let mut queue = MockJobQueue::new();
        queue.expect_push().times(1).returning(|_| Ok(()));
        let repo = InMemoryJobRepository::new();
        let dispatcher = JobDispatcher::new(queue, repo.clone(), &settings());

        let accepted = dispatcher.submit_raw(submission()).await.unwrap();
        assert_eq!(accepted.config.local_work_dir, PathBuf::from("/work/m1/1/u1"));

        let stored = repo.get(&accepted.request.key).await.unwrap().unwrap();
        assert_eq!(stored.run_id, accepted.run_id);
        assert_eq!(stored.stage, Stage::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_rejected() {
        let mut queue = MockJobQueue::new();
        queue.expect_push().times(1).returning(|_| Ok(()));
        let dispatcher = JobDispatcher::new(queue, InMemoryJobRepository::new(), &settings());

        dispatcher.submit_raw(submission()).await.unwrap();
        let err = dispatcher.submit_raw(submission()).await.unwrap_err();
        assert!(matches!(err, SubmitError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_invalid_submission_creates_no_state() {
        let mut queue = MockJobQueue::new();
        queue.expect_push().never();
        let repo = InMemoryJobRepository::new();
        let dispatcher = JobDispatcher::new(queue, repo.clone(), &settings());

        let mut body = submission();
        body.user_id = None;
        let err = dispatcher.submit_raw(body).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Invalid(ValidationError::MissingField("user_id"))
        ));

        let key = NaturalKey::new("m1", "1", "u1").unwrap();
        assert!(repo.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_claim() {
        let mut queue = MockJobQueue::new();
        let mut closed = true;
        queue.expect_push().times(2).returning(move |_| {
            if std::mem::replace(&mut closed, false) {
                Err("job queue is closed".into())
            } else {
                Ok(())
            }
        });
        let dispatcher = JobDispatcher::new(queue, InMemoryJobRepository::new(), &settings());

        let err = dispatcher.submit_raw(submission()).await.unwrap_err();
        assert!(matches!(err, SubmitError::QueueClosed));

        assert!(dispatcher.submit_raw(submission()).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandon_queued_marks_pending_failed() {
        let queue = ChannelQueue::new(4);
        let repo = InMemoryJobRepository::new();
        let dispatcher = JobDispatcher::new(queue.clone(), repo.clone(), &settings());

        let first = dispatcher.submit_raw(submission()).await.unwrap();
        let mut other = submission();
        other.user_id = Some("u2".into());
        let second = dispatcher.submit_raw(other).await.unwrap();
        queue.close().await;

        assert_eq!(dispatcher.abandon_queued().await, 2);
        for accepted in [first, second] {
            let stored = repo.get(&accepted.request.key).await.unwrap().unwrap();
            assert_eq!(stored.run_id, accepted.run_id);
            assert_eq!(stored.stage, Stage::Failed);
            assert!(stored.error.as_deref().unwrap().contains("service stopped"));
        }
        assert_eq!(dispatcher.abandon_queued().await, 0);
    }
}
