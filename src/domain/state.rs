use super::jobs::NaturalKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Position of a job in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Preparing,
    Fetching,
    Organizing,
    NormalizingVideo,
    NormalizingAudio,
    Transcribing,
    Muxing,
    Publishing,
    CleaningUp,
    Succeeded,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Preparing => "preparing",
            Stage::Fetching => "fetching",
            Stage::Organizing => "organizing",
            Stage::NormalizingVideo => "normalizing_video",
            Stage::NormalizingAudio => "normalizing_audio",
            Stage::Transcribing => "transcribing",
            Stage::Muxing => "muxing",
            Stage::Publishing => "publishing",
            Stage::CleaningUp => "cleaning_up",
            Stage::Succeeded => "succeeded",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// Stage intentionally not run.
    Skipped(String),
    /// Optional stage failed; the job continues without its output.
    SkippedWithError(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

/// Intermediate and final files produced while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub concatenated_video: Option<PathBuf>,
    pub concatenated_audio: Option<PathBuf>,
    pub normalized_video: Option<PathBuf>,
    pub encoded_audio: Option<PathBuf>,
    pub waveform: Option<PathBuf>,
    pub transcript_json: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub final_video: Option<PathBuf>,
}

/// Snapshot of a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub key: NaturalKey,
    pub stage: Stage,
    pub stages: Vec<StageRecord>,
    pub artifacts: Artifacts,
    pub published: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(key: NaturalKey) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            key,
            stage: Stage::Pending,
            stages: Vec::new(),
            artifacts: Artifacts::default(),
            published: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome, elapsed_ms: u64) {
        self.stages.push(StageRecord {
            stage,
            outcome,
            elapsed_ms,
        });
    }

    pub fn outcome_of(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// Move to a terminal stage. A state that is already terminal is left as is.
    pub fn finish(&mut self, error: Option<String>) {
        if self.is_terminal() {
            return;
        }
        self.stage = if error.is_some() {
            Stage::Failed
        } else {
            Stage::Succeeded
        };
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}
