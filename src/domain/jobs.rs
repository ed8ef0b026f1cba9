use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Root of every object key the service reads or writes.
pub const STORAGE_PREFIX: &str = "recordings";

/// Whisper model sizes accepted on a job request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    pub const ALL: [WhisperModel; 5] = [
        WhisperModel::Tiny,
        WhisperModel::Base,
        WhisperModel::Small,
        WhisperModel::Medium,
        WhisperModel::Large,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
        }
    }

    /// ggml file name as published by whisper.cpp.
    pub fn filename(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "ggml-tiny.bin",
            WhisperModel::Base => "ggml-base.bin",
            WhisperModel::Small => "ggml-small.bin",
            WhisperModel::Medium => "ggml-medium.bin",
            WhisperModel::Large => "ggml-large-v3.bin",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WhisperModel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WhisperModel::ALL
            .into_iter()
            .find(|model| model.name() == s)
            .ok_or_else(|| ValidationError::InvalidModel(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required tokens: 'meeting_id', 'take', 'user_id' (missing {0})")]
    MissingField(&'static str),

    #[error("Invalid {field}: {value:?} may not contain path separators or dot segments")]
    UnsafeIdentifier { field: &'static str, value: String },

    #[error("Invalid whisper model: {0}. Valid models: tiny, base, small, medium, large")]
    InvalidModel(String),
}

/// The (meeting_id, take, user_id) triple identifying a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub meeting_id: String,
    pub take: String,
    pub user_id: String,
}

impl NaturalKey {
    pub fn new(
        meeting_id: impl Into<String>,
        take: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = Self {
            meeting_id: meeting_id.into(),
            take: take.into(),
            user_id: user_id.into(),
        };
        check_identifier("meeting_id", &key.meeting_id)?;
        check_identifier("take", &key.take)?;
        check_identifier("user_id", &key.user_id)?;
        Ok(key)
    }

    /// `meeting_id/take/user_id`
    pub fn dir(&self) -> String {
        format!("{}/{}/{}", self.meeting_id, self.take, self.user_id)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir())
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(ValidationError::UnsafeIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Raw submission body. Every field is optional so that validation can
/// report exactly what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSubmission {
    pub meeting_id: Option<String>,
    pub take: Option<String>,
    pub user_id: Option<String>,
    pub whisper_model: Option<String>,
    pub cleanup: Option<bool>,
    pub skip_transcription: Option<bool>,
}

impl JobSubmission {
    pub fn validate(self) -> Result<JobRequest, ValidationError> {
        let meeting_id = self
            .meeting_id
            .ok_or(ValidationError::MissingField("meeting_id"))?;
        let take = self.take.ok_or(ValidationError::MissingField("take"))?;
        let user_id = self.user_id.ok_or(ValidationError::MissingField("user_id"))?;
        let key = NaturalKey::new(meeting_id, take, user_id)?;

        let whisper_model = match self.whisper_model {
            Some(name) => name.parse()?,
            None => WhisperModel::default(),
        };

        Ok(JobRequest {
            key,
            whisper_model,
            cleanup: self.cleanup.unwrap_or(true),
            skip_transcription: self.skip_transcription.unwrap_or(false),
        })
    }
}

/// A validated processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub key: NaturalKey,
    pub whisper_model: WhisperModel,
    pub cleanup: bool,
    pub skip_transcription: bool,
}

impl JobRequest {
    pub fn new(key: NaturalKey) -> Self {
        Self {
            key,
            whisper_model: WhisperModel::default(),
            cleanup: true,
            skip_transcription: false,
        }
    }
}

/// Namespaces owned by one job. Every field is derived from the natural key
/// and the two local roots, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub remote_source_prefix: String,
    pub local_work_dir: PathBuf,
    pub local_output_dir: PathBuf,
    pub remote_destination_prefix: String,
    pub output_base: String,
}

impl JobConfig {
    pub fn derive(key: &NaturalKey, local_root: &Path, output_root: &Path) -> Self {
        let rel = Path::new(&key.meeting_id).join(&key.take).join(&key.user_id);
        Self {
            remote_source_prefix: format!("{}/{}/", STORAGE_PREFIX, key.dir()),
            local_work_dir: local_root.join(&rel),
            local_output_dir: output_root.join(&rel),
            remote_destination_prefix: format!(
                "{}/{}/{}/",
                STORAGE_PREFIX, key.meeting_id, key.take
            ),
            output_base: key.user_id.clone(),
        }
    }

    /// Directory the raw chunks are downloaded into.
    pub fn chunks_dir(&self) -> PathBuf {
        self.local_work_dir.join("chunks")
    }

    pub fn output_file(&self, extension: &str) -> PathBuf {
        self.local_output_dir
            .join(format!("{}.{}", self.output_base, extension))
    }

    pub fn destination_key(&self, extension: &str) -> String {
        format!(
            "{}{}.{}",
            self.remote_destination_prefix, self.output_base, extension
        )
    }
}
