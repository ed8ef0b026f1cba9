use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media engine not found: {0}")]
    EngineNotFound(String),

    #[error("invalid input for {operation}: {reason}")]
    InvalidInput {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} failed with exit code {exit_code:?}: {stderr}")]
    NonZeroExit {
        operation: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Output encodings the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeProfile {
    /// H.264, no audio.
    H264Video,
    /// AAC at 128 kbit/s, no video.
    AacAudio,
    /// 16 kHz mono signed 16-bit PCM WAV, the transcriber's input format.
    PcmWaveform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxInputs {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub subtitles: Option<PathBuf>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Fail fast when the engine cannot be executed at all.
    async fn check_available(&self) -> Result<(), MediaError>;

    /// Join fragments of one stream, in order, into `output`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;

    /// Regenerate presentation timestamps without re-encoding.
    async fn fix_timestamps(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: TranscodeProfile,
    ) -> Result<(), MediaError>;

    /// Combine video, audio and optional soft captions into one container.
    async fn mux(&self, inputs: &MuxInputs, output: &Path) -> Result<(), MediaError>;
}
