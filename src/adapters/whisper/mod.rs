//! Speech recognition through whisper.cpp.
//!
//! The real engine is compiled in with the `whisper` feature. Without it,
//! [`UnavailableTranscriber`] reports every request as unavailable and jobs
//! complete without captions.

pub mod cache;
#[cfg(feature = "whisper")]
pub mod model;

use crate::domain::jobs::WhisperModel;
use crate::domain::transcript::Transcription;
use crate::ports::transcription::{Transcriber, TranscriptionError};
use async_trait::async_trait;
use std::path::Path;

pub use cache::ModelCache;

#[cfg(feature = "whisper")]
pub use engine::WhisperTranscriber;

/// Transcriber used when no speech engine is compiled in.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableTranscriber;

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(
        &self,
        _wav: &Path,
        _model: WhisperModel,
    ) -> Result<Transcription, TranscriptionError> {
        Err(TranscriptionError::Unavailable(
            "built without the `whisper` feature".to_string(),
        ))
    }
}

#[cfg(feature = "whisper")]
mod engine {
    use super::cache::ModelCache;
    use super::model::ensure_model;
    use crate::domain::jobs::WhisperModel;
    use crate::domain::transcript::{Transcription, TranscriptSegment};
    use crate::ports::transcription::{Transcriber, TranscriptionError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tracing::{debug, info};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const WHISPER_SAMPLE_RATE: u32 = 16_000;

    /// Loaded contexts, shared by every job in the process.
    static CONTEXTS: ModelCache<WhisperContext> = ModelCache::new();

    #[derive(Clone, Debug)]
    pub struct WhisperTranscriber {
        model_dir: PathBuf,
    }

    impl WhisperTranscriber {
        pub fn new(model_dir: impl Into<PathBuf>) -> Self {
            Self {
                model_dir: model_dir.into(),
            }
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(
            &self,
            wav: &Path,
            model: WhisperModel,
        ) -> Result<Transcription, TranscriptionError> {
            let model_path = match CONTEXTS.get(model) {
                Some(_) => None,
                None => Some(ensure_model(model, &self.model_dir).await?),
            };
            let wav = wav.to_path_buf();

            tokio::task::spawn_blocking(move || {
                let ctx = CONTEXTS.get_or_try_load(model, || {
                    let path = match model_path {
                        Some(path) => path,
                        None => {
                            return Err(TranscriptionError::Model {
                                model,
                                reason: "model path unavailable".to_string(),
                            })
                        }
                    };
                    load_context(model, &path)
                })?;
                let samples = read_wav(&wav)?;
                run_inference(&ctx, &samples)
            })
            .await
            .map_err(|e| TranscriptionError::Inference(format!("inference task failed: {e}")))?
        }
    }

    fn load_context(model: WhisperModel, path: &Path) -> Result<WhisperContext, TranscriptionError> {
        info!(model = %model, path = %path.display(), "loading whisper model");
        let path_str = path.to_str().ok_or_else(|| TranscriptionError::Model {
            model,
            reason: "model path contains invalid UTF-8".to_string(),
        })?;
        WhisperContext::new_with_params(path_str, WhisperContextParameters::default()).map_err(
            |e| TranscriptionError::Model {
                model,
                reason: e.to_string(),
            },
        )
    }

    /// Read a 16 kHz mono WAV into f32 samples.
    fn read_wav(path: &Path) -> Result<Vec<f32>, TranscriptionError> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| TranscriptionError::Audio(format!("failed to open WAV file: {e}")))?;
        let spec = reader.spec();

        if spec.sample_rate != WHISPER_SAMPLE_RATE || spec.channels != 1 {
            return Err(TranscriptionError::Audio(format!(
                "expected 16kHz mono, got {}Hz with {} channels",
                spec.sample_rate, spec.channels
            )));
        }

        match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| {
                        s.map(|sample| sample as f32 / max_val)
                            .map_err(|e| TranscriptionError::Audio(e.to_string()))
                    })
                    .collect()
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map_err(|e| TranscriptionError::Audio(e.to_string())))
                .collect(),
        }
    }

    fn run_inference(
        ctx: &Arc<WhisperContext>,
        samples: &[f32],
    ) -> Result<Transcription, TranscriptionError> {
        let inference = |e: whisper_rs::WhisperError| TranscriptionError::Inference(e.to_string());

        let mut state = ctx.create_state().map_err(inference)?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
        params.set_detect_language(true);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        info!(samples = samples.len(), "running transcription");
        state.full(params, samples).map_err(inference)?;

        let num_segments = state.full_n_segments();
        debug!(num_segments, "transcription complete");

        let mut segments = Vec::with_capacity(num_segments.max(0) as usize);
        for i in 0..num_segments {
            let segment = state.get_segment(i).ok_or_else(|| {
                TranscriptionError::Inference(format!("segment {i} not found"))
            })?;
            let text = segment
                .to_str_lossy()
                .map_err(inference)?
                .into_owned();

            // Timestamps are in centiseconds
            segments.push(TranscriptSegment::new(
                segment.start_timestamp() as f64 / 100.0,
                segment.end_timestamp() as f64 / 100.0,
                text,
            ));
        }

        let language = whisper_rs::get_lang_str(state.full_lang_id_from_state())
            .unwrap_or("unknown")
            .to_string();

        Ok(Transcription { language, segments })
    }
}
