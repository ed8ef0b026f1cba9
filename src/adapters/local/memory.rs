use crate::domain::jobs::NaturalKey;
use crate::domain::state::PipelineState;
use crate::ports::repository::JobRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Job store keeping the latest snapshot per natural key in memory.
#[derive(Clone, Default)]
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<NaturalKey, PipelineState>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn try_claim(&self, state: &PipelineState) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(&state.key) {
            if !existing.is_terminal() {
                return Ok(false);
            }
        }
        jobs.insert(state.key.clone(), state.clone());
        Ok(true)
    }

    async fn save(&self, state: &PipelineState) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut jobs = self.jobs.write().await;
        // A stale run must not overwrite the run that now holds the key.
        if let Some(existing) = jobs.get(&state.key) {
            if existing.run_id != state.run_id {
                return Err(format!(
                    "run {} no longer owns {}",
                    state.run_id, state.key
                )
                .into());
            }
        }
        jobs.insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn get(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<PipelineState>, Box<dyn Error + Send + Sync>> {
        Ok(self.jobs.read().await.get(key).cloned())
    }
}
