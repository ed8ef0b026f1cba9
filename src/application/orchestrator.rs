//! Drives one job through every stage and guarantees a terminal record.

use crate::application::errors::{FetchError, PipelineError, PrepareError, PublishError};
use crate::application::retry::RetryPolicy;
use crate::config::PipelineSettings;
use crate::domain::chunks::{self, OrganizeError, OrganizedChunks};
use crate::domain::jobs::{JobConfig, JobRequest, NaturalKey};
use crate::domain::state::{PipelineState, Stage, StageOutcome};
use crate::domain::transcript::{self, CaptionFiles};
use crate::ports::media::{MediaEngine, MuxInputs, TranscodeProfile};
use crate::ports::repository::JobRepository;
use crate::ports::storage::StoragePort;
use crate::ports::transcription::{Transcriber, TranscriptionError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Terminal record of a run together with the namespaces it used.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub state: PipelineState,
    pub config: JobConfig,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.state.stage == Stage::Succeeded
    }
}

struct NormalizedVideo {
    concatenated: PathBuf,
    normalized: PathBuf,
}

struct NormalizedAudio {
    concatenated: PathBuf,
    waveform: PathBuf,
    encoded: PathBuf,
}

pub struct PipelineOrchestrator<S, M, T, R> {
    storage: S,
    media: M,
    transcriber: T,
    repo: R,
    settings: PipelineSettings,
}

impl<S, M, T, R> PipelineOrchestrator<S, M, T, R>
where
    S: StoragePort,
    M: MediaEngine,
    T: Transcriber,
    R: JobRepository,
{
    pub fn new(storage: S, media: M, transcriber: T, repo: R, settings: PipelineSettings) -> Self {
        Self {
            storage,
            media,
            transcriber,
            repo,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.transfer_attempts,
            self.settings.transfer_backoff,
        )
    }

    /// Run a job to completion. Never fails: the outcome is in the returned
    /// state, which is also the last snapshot written to the job store.
    pub async fn run(&self, request: JobRequest) -> JobResult {
        let config = JobConfig::derive(
            &request.key,
            &self.settings.local_root,
            &self.settings.output_root,
        );
        let mut state = self.current_state(&request.key).await;

        info!(
            run_id = %state.run_id,
            key = %request.key,
            model = %request.whisper_model,
            "starting job"
        );

        let result = self.execute(&request, &config, &mut state).await;
        if let Err(err) = &result {
            error!(run_id = %state.run_id, key = %request.key, error = %err, "job failed");
        }

        self.cleanup(&request, &config, &mut state).await;

        state.finish(result.err().map(|e| e.to_string()));
        self.persist(&state).await;

        info!(
            run_id = %state.run_id,
            key = %request.key,
            status = %state.stage,
            published = state.published.len(),
            "job finished"
        );
        JobResult { state, config }
    }

    /// The pending record written at submission, or a fresh one claimed in
    /// the job store so its snapshots are accepted.
    async fn current_state(&self, key: &NaturalKey) -> PipelineState {
        match self.repo.get(key).await {
            Ok(Some(state)) if !state.is_terminal() => return state,
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "could not read job store"),
        }

        let state = PipelineState::new(key.clone());
        match self.repo.try_claim(&state).await {
            Ok(true) => {}
            Ok(false) => warn!(
                run_id = %state.run_id,
                key = %key,
                "key claimed by another run, snapshots will not be stored"
            ),
            Err(e) => warn!(run_id = %state.run_id, error = %e, "failed to claim job key"),
        }
        state
    }

    async fn persist(&self, state: &PipelineState) {
        if let Err(e) = self.repo.save(state).await {
            warn!(run_id = %state.run_id, error = %e, "failed to save job state");
        }
    }

    async fn execute(
        &self,
        request: &JobRequest,
        config: &JobConfig,
        state: &mut PipelineState,
    ) -> Result<(), PipelineError> {
        self.step(state, Stage::Preparing, false, self.prepare(config))
            .await?;

        self.step(state, Stage::Fetching, true, self.fetch(config))
            .await?;

        let chunks_dir = config.chunks_dir();
        let organized = self
            .step(state, Stage::Organizing, true, async {
                let dir = chunks_dir.clone();
                tokio::task::spawn_blocking(move || chunks::organize(&dir))
                    .await
                    .map_err(|e| OrganizeError::Io {
                        path: chunks_dir.clone(),
                        source: e.into(),
                    })?
                    .map_err(PipelineError::from)
            })
            .await?;

        let video = self
            .step(
                state,
                Stage::NormalizingVideo,
                true,
                self.normalize_video(config, &organized),
            )
            .await?;
        state.artifacts.concatenated_video = Some(video.concatenated);
        state.artifacts.normalized_video = Some(video.normalized.clone());

        let audio = self
            .step(
                state,
                Stage::NormalizingAudio,
                true,
                self.normalize_audio(config, &organized),
            )
            .await?;
        state.artifacts.concatenated_audio = Some(audio.concatenated);
        state.artifacts.waveform = Some(audio.waveform.clone());
        state.artifacts.encoded_audio = Some(audio.encoded.clone());

        let captions = self.transcribe_stage(request, config, &audio.waveform, state).await;
        if let Some(files) = &captions {
            state.artifacts.transcript_json = Some(files.json.clone());
            state.artifacts.subtitles = files.srt.clone();
        }

        let final_video = config.output_file("mp4");
        let inputs = MuxInputs {
            video: video.normalized,
            audio: audio.encoded,
            subtitles: captions.as_ref().and_then(|c| c.srt.clone()),
        };
        self.step(state, Stage::Muxing, true, async {
            self.media
                .mux(&inputs, &final_video)
                .await
                .map_err(PipelineError::media(Stage::Muxing))
        })
        .await?;
        state.artifacts.final_video = Some(final_video.clone());

        let published = self
            .step(
                state,
                Stage::Publishing,
                true,
                self.publish(config, &final_video, captions.as_ref()),
            )
            .await?;
        state.published = published;

        Ok(())
    }

    /// Enter `stage`, run `work` (under the stage timeout when `timed`) and
    /// record how it went.
    async fn step<O, F>(
        &self,
        state: &mut PipelineState,
        stage: Stage,
        timed: bool,
        work: F,
    ) -> Result<O, PipelineError>
    where
        F: Future<Output = Result<O, PipelineError>>,
    {
        state.enter(stage);
        self.persist(state).await;

        let started = Instant::now();
        let result = match self.settings.stage_timeout.filter(|_| timed) {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    stage,
                    secs: limit.as_secs(),
                }),
            },
            None => work.await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                info!(run_id = %state.run_id, stage = %stage, elapsed_ms, "stage complete");
                state.record(stage, StageOutcome::Succeeded, elapsed_ms);
            }
            Err(e) => state.record(stage, StageOutcome::Failed(e.to_string()), elapsed_ms),
        }
        result
    }

    async fn prepare(&self, config: &JobConfig) -> Result<(), PipelineError> {
        for dir in [&config.local_work_dir, &config.local_output_dir] {
            reset_dir(dir).await?;
        }
        let chunks_dir = config.chunks_dir();
        tokio::fs::create_dir_all(&chunks_dir)
            .await
            .map_err(|source| PrepareError::Io {
                path: chunks_dir.clone(),
                source,
            })?;

        self.media
            .check_available()
            .await
            .map_err(PrepareError::Engine)?;
        Ok(())
    }

    async fn fetch(&self, config: &JobConfig) -> Result<(), PipelineError> {
        let prefix = &config.remote_source_prefix;
        let keys: Vec<(String, String)> = self
            .storage
            .list(prefix)
            .await
            .map_err(|source| FetchError::List {
                prefix: prefix.clone(),
                source,
            })?
            .into_iter()
            .filter(|key| !key.ends_with('/'))
            .filter_map(|key| chunk_file_name(prefix, &key).map(|name| (key, name)))
            .collect();

        if keys.is_empty() {
            return Err(FetchError::NoRecording {
                prefix: prefix.clone(),
            }
            .into());
        }

        let chunks_dir = config.chunks_dir();
        let policy = self.retry_policy();
        for (key, file_name) in &keys {
            let dest = chunks_dir.join(file_name);
            policy
                .run(key, || self.storage.download(key, &dest))
                .await
                .map_err(|failure| FetchError::Download {
                    key: key.clone(),
                    attempts: failure.attempts,
                    source: failure.source,
                })?;
        }

        info!(prefix = %prefix, count = keys.len(), "downloaded chunks");
        Ok(())
    }

    async fn normalize_video(
        &self,
        config: &JobConfig,
        organized: &OrganizedChunks,
    ) -> Result<NormalizedVideo, PipelineError> {
        let media_err = PipelineError::media;
        let work = &config.local_work_dir;
        let concatenated = work.join("video_concat.webm");
        let fixed = work.join("video_fixed.webm");
        let normalized = work.join("video.mp4");

        self.media
            .concat(&OrganizedChunks::paths(&organized.video), &concatenated)
            .await
            .map_err(media_err(Stage::NormalizingVideo))?;
        self.media
            .fix_timestamps(&concatenated, &fixed)
            .await
            .map_err(media_err(Stage::NormalizingVideo))?;
        self.media
            .transcode(&fixed, &normalized, TranscodeProfile::H264Video)
            .await
            .map_err(media_err(Stage::NormalizingVideo))?;

        Ok(NormalizedVideo {
            concatenated,
            normalized,
        })
    }

    async fn normalize_audio(
        &self,
        config: &JobConfig,
        organized: &OrganizedChunks,
    ) -> Result<NormalizedAudio, PipelineError> {
        let media_err = PipelineError::media;
        let work = &config.local_work_dir;
        let concatenated = work.join("audio_concat.webm");
        let fixed = work.join("audio_fixed.webm");
        let waveform = work.join("audio.wav");
        let encoded = work.join("audio.m4a");

        self.media
            .concat(&OrganizedChunks::paths(&organized.audio), &concatenated)
            .await
            .map_err(media_err(Stage::NormalizingAudio))?;
        self.media
            .fix_timestamps(&concatenated, &fixed)
            .await
            .map_err(media_err(Stage::NormalizingAudio))?;
        self.media
            .transcode(&fixed, &waveform, TranscodeProfile::PcmWaveform)
            .await
            .map_err(media_err(Stage::NormalizingAudio))?;
        self.media
            .transcode(&fixed, &encoded, TranscodeProfile::AacAudio)
            .await
            .map_err(media_err(Stage::NormalizingAudio))?;

        Ok(NormalizedAudio {
            concatenated,
            waveform,
            encoded,
        })
    }

    /// Optional stage: any failure is recorded and the job carries on
    /// without captions.
    async fn transcribe_stage(
        &self,
        request: &JobRequest,
        config: &JobConfig,
        waveform: &Path,
        state: &mut PipelineState,
    ) -> Option<CaptionFiles> {
        let stage = Stage::Transcribing;
        if request.skip_transcription {
            state.record(
                stage,
                StageOutcome::Skipped("transcription disabled for this job".to_string()),
                0,
            );
            return None;
        }

        state.enter(stage);
        self.persist(state).await;
        let started = Instant::now();

        let work = self.transcribe(request, config, waveform);
        let result = match self.settings.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or(Err(TranscriptionError::Timeout(limit.as_secs()))),
            None => work.await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(files) => {
                state.record(stage, StageOutcome::Succeeded, elapsed_ms);
                Some(files)
            }
            Err(e) => {
                warn!(
                    run_id = %state.run_id,
                    error = %e,
                    "transcription failed, continuing without captions"
                );
                state.record(stage, StageOutcome::SkippedWithError(e.to_string()), elapsed_ms);
                None
            }
        }
    }

    async fn transcribe(
        &self,
        request: &JobRequest,
        config: &JobConfig,
        waveform: &Path,
    ) -> Result<CaptionFiles, TranscriptionError> {
        let transcription = self
            .transcriber
            .transcribe(waveform, request.whisper_model)
            .await?;
        info!(
            language = %transcription.language,
            segments = transcription.segments.len(),
            "transcribed audio"
        );

        let files = transcript::write_caption_files(
            &config.local_output_dir,
            &config.output_base,
            &request.key,
            request.whisper_model,
            transcription,
        )
        .await?;
        Ok(files)
    }

    /// Upload the video (required), then the transcript and subtitles (best
    /// effort). Returns the keys that were written.
    async fn publish(
        &self,
        config: &JobConfig,
        final_video: &Path,
        captions: Option<&CaptionFiles>,
    ) -> Result<Vec<String>, PipelineError> {
        let policy = self.retry_policy();
        let mut published = Vec::new();

        let video_key = config.destination_key("mp4");
        policy
            .run(&video_key, || self.storage.upload(final_video, &video_key))
            .await
            .map_err(|failure| PublishError::Upload {
                key: video_key.clone(),
                attempts: failure.attempts,
                source: failure.source,
            })?;
        published.push(video_key);

        let extras = captions
            .map(|c| {
                let mut files = vec![(c.json.clone(), "json")];
                if let Some(srt) = &c.srt {
                    files.push((srt.clone(), "srt"));
                }
                files
            })
            .unwrap_or_default();

        for (path, extension) in extras {
            let key = config.destination_key(extension);
            match policy.run(&key, || self.storage.upload(&path, &key)).await {
                Ok(()) => published.push(key),
                Err(failure) => warn!(
                    key = %key,
                    attempts = failure.attempts,
                    error = %failure.source,
                    "optional upload failed"
                ),
            }
        }

        info!(count = published.len(), "published outputs");
        Ok(published)
    }

    /// Best effort. Never changes the job outcome.
    async fn cleanup(&self, request: &JobRequest, config: &JobConfig, state: &mut PipelineState) {
        let stage = Stage::CleaningUp;
        if !request.cleanup {
            state.record(
                stage,
                StageOutcome::Skipped("cleanup disabled for this job".to_string()),
                0,
            );
            return;
        }

        state.enter(stage);
        self.persist(state).await;
        let started = Instant::now();

        let mut failures = Vec::new();
        for dir in [&config.local_work_dir, &config.local_output_dir] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cleanup failed");
                    failures.push(format!("{}: {e}", dir.display()));
                }
            }
        }

        let outcome = if failures.is_empty() {
            StageOutcome::Succeeded
        } else {
            StageOutcome::SkippedWithError(failures.join("; "))
        };
        state.record(stage, outcome, started.elapsed().as_millis() as u64);
    }
}

/// Local file name for an object directly under `prefix`. Nested objects
/// and dot segments are skipped.
fn chunk_file_name(prefix: &str, key: &str) -> Option<String> {
    let name = key.strip_prefix(prefix).unwrap_or_default();
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        warn!(key = %key, "skipping object outside the chunk listing");
        return None;
    }
    Some(name.to_string())
}

async fn reset_dir(dir: &Path) -> Result<(), PrepareError> {
    let io_err = |source| PrepareError::Io {
        path: dir.to_path_buf(),
        source,
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_err)
}
