use crate::domain::jobs::NaturalKey;
use crate::domain::state::PipelineState;
use async_trait::async_trait;
use std::error::Error;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Record a new run for its natural key.
    /// Returns false when a non-terminal run already holds the key.
    async fn try_claim(&self, state: &PipelineState) -> Result<bool, Box<dyn Error + Send + Sync>>;

    /// Overwrite the snapshot for the state's natural key
    async fn save(&self, state: &PipelineState) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Latest snapshot for a key
    async fn get(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<PipelineState>, Box<dyn Error + Send + Sync>>;
}
