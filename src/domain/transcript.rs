//! Caption formatting: SRT rendering and the JSON transcript document.

use super::jobs::{NaturalKey, WhisperModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A timestamped piece of recognised speech. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcription {
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Order segments by start time, trim text, drop empty segments and clip
/// overlaps so that each segment ends no later than the next one starts.
pub fn normalize_segments(segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = segments
        .into_iter()
        .filter(|s| s.start.is_finite() && s.end.is_finite())
        .filter_map(|s| {
            let text = s.text.trim();
            if text.is_empty() {
                return None;
            }
            let start = s.start.max(0.0);
            Some(TranscriptSegment {
                start,
                end: s.end.max(start),
                text: text.to_string(),
            })
        })
        .collect();

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    for i in 1..segments.len() {
        let next_start = segments[i].start;
        let prev = &mut segments[i - 1];
        if prev.end > next_start {
            prev.end = next_start;
        }
    }
    segments
}

/// Format seconds as an SRT timestamp: HH:MM:SS,mmm
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1_000;
    let ms = total_ms % 1_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

pub fn to_srt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(seg.start),
            format_srt_time(seg.end),
            seg.text.trim()
        );
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSegment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// JSON transcript published next to the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub meeting_id: String,
    pub take: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_used: WhisperModel,
    pub language: String,
    pub full_text: String,
    pub segments: Vec<DocumentSegment>,
}

impl TranscriptDocument {
    pub fn new(key: &NaturalKey, model: WhisperModel, transcription: &Transcription) -> Self {
        Self {
            meeting_id: key.meeting_id.clone(),
            take: key.take.clone(),
            user_id: key.user_id.clone(),
            timestamp: Utc::now(),
            model_used: model,
            language: transcription.language.clone(),
            full_text: transcription.full_text(),
            segments: transcription
                .segments
                .iter()
                .enumerate()
                .map(|(id, s)| DocumentSegment {
                    id,
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionFiles {
    pub json: PathBuf,
    /// Absent when the transcript has no segments.
    pub srt: Option<PathBuf>,
}

/// Write `{base}.json` and, when there is anything to show, `{base}.srt`
/// into `dir`. Segments are normalized first.
pub async fn write_caption_files(
    dir: &Path,
    base: &str,
    key: &NaturalKey,
    model: WhisperModel,
    transcription: Transcription,
) -> std::io::Result<CaptionFiles> {
    let transcription = Transcription {
        language: transcription.language,
        segments: normalize_segments(transcription.segments),
    };

    let document = TranscriptDocument::new(key, model, &transcription);
    let json = serde_json::to_vec_pretty(&document)?;
    let json_path = dir.join(format!("{base}.json"));
    tokio::fs::write(&json_path, json).await?;

    let srt = if transcription.segments.is_empty() {
        None
    } else {
        let srt_path = dir.join(format!("{base}.srt"));
        tokio::fs::write(&srt_path, to_srt(&transcription.segments)).await?;
        Some(srt_path)
    };

    debug!(
        segments = transcription.segments.len(),
        json = %json_path.display(),
        "caption files written"
    );
    Ok(CaptionFiles {
        json: json_path,
        srt,
    })
}
