use crate::domain::chunks::OrganizeError;
use crate::domain::jobs::{NaturalKey, ValidationError};
use crate::domain::state::Stage;
use crate::ports::media::MediaError;
use crate::ports::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("media engine unavailable: {0}")]
    Engine(#[source] MediaError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no recording found under {prefix}")]
    NoRecording { prefix: String },

    #[error("failed to list {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to download {key} after {attempts} attempt(s): {source}")]
    Download {
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to upload {key} after {attempts} attempt(s): {source}")]
    Upload {
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

/// Any error that stops a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Organize(#[from] OrganizeError),

    #[error("{stage} failed: {source}")]
    Media {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },
}

impl PipelineError {
    pub fn media(stage: Stage) -> impl FnOnce(MediaError) -> Self {
        move |source| Self::Media { stage, source }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("a job for {0} is already running")]
    AlreadyRunning(NaturalKey),

    #[error("job queue is closed")]
    QueueClosed,

    #[error("job store error: {0}")]
    Store(String),
}
