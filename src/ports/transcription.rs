use crate::domain::jobs::WhisperModel;
use crate::domain::transcript::Transcription;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription is not available: {0}")]
    Unavailable(String),

    #[error("failed to load model {model}: {reason}")]
    Model { model: WhisperModel, reason: String },

    #[error("failed to read audio: {0}")]
    Audio(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("transcription timed out after {0}s")]
    Timeout(u64),

    #[error("failed to write captions: {0}")]
    Captions(#[from] std::io::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Recognise speech in a 16 kHz mono WAV file.
    async fn transcribe(
        &self,
        wav: &Path,
        model: WhisperModel,
    ) -> Result<Transcription, TranscriptionError>;
}
