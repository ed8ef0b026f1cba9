#[cfg(test)]
mod functional_tests {
    use crate::adapters::local::{ChannelQueue, FsAdapter, InMemoryJobRepository};
    use crate::adapters::whisper::UnavailableTranscriber;
    use crate::application::dispatcher::JobDispatcher;
    use crate::application::orchestrator::PipelineOrchestrator;
    use crate::application::worker::WorkerService;
    use crate::config::PipelineSettings;
    use crate::domain::jobs::{JobRequest, JobSubmission, NaturalKey, WhisperModel};
    use crate::domain::state::{Stage, StageOutcome};
    use crate::domain::transcript::{TranscriptSegment, Transcription};
    use crate::ports::media::{MediaEngine, MediaError, MuxInputs, TranscodeProfile};
    use crate::ports::transcription::{Transcriber, TranscriptionError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio_util::sync::CancellationToken;

    /// Media engine that shuffles bytes around instead of running ffmpeg, so
    /// the output shows which inputs reached it and in what order.
    struct ByteMedia;

    fn io_err(operation: &'static str) -> impl Fn(std::io::Error) -> MediaError {
        move |source| MediaError::Io { operation, source }
    }

    #[async_trait]
    impl MediaEngine for ByteMedia {
        async fn check_available(&self) -> Result<(), MediaError> {
            Ok(())
        }

        async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
            let mut bytes = Vec::new();
            for input in inputs {
                bytes.extend(tokio::fs::read(input).await.map_err(io_err("concat"))?);
            }
            tokio::fs::write(output, bytes).await.map_err(io_err("concat"))
        }

        async fn fix_timestamps(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
            tokio::fs::copy(input, output)
                .await
                .map(|_| ())
                .map_err(io_err("fix_timestamps"))
        }

        async fn transcode(
            &self,
            input: &Path,
            output: &Path,
            _profile: TranscodeProfile,
        ) -> Result<(), MediaError> {
            tokio::fs::copy(input, output)
                .await
                .map(|_| ())
                .map_err(io_err("transcode"))
        }

        async fn mux(&self, inputs: &MuxInputs, output: &Path) -> Result<(), MediaError> {
            let mut bytes = tokio::fs::read(&inputs.video).await.map_err(io_err("mux"))?;
            bytes.extend(tokio::fs::read(&inputs.audio).await.map_err(io_err("mux"))?);
            if inputs.subtitles.is_some() {
                bytes.extend_from_slice(b"|subs");
            }
            tokio::fs::write(output, bytes).await.map_err(io_err("mux"))
        }
    }

    /// Returns a fixed transcript, or fails when it has none.
    struct ScriptedTranscriber(Option<Vec<TranscriptSegment>>);

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(
            &self,
            wav: &Path,
            _model: WhisperModel,
        ) -> Result<Transcription, TranscriptionError> {
            assert!(wav.exists(), "waveform missing: {}", wav.display());
            match &self.0 {
                Some(segments) => Ok(Transcription {
                    language: "en".to_string(),
                    segments: segments.clone(),
                }),
                None => Err(TranscriptionError::Inference("model crashed".to_string())),
            }
        }
    }

    fn speech() -> ScriptedTranscriber {
        ScriptedTranscriber(Some(vec![
            TranscriptSegment::new(0.0, 1.5, "Hello there"),
            TranscriptSegment::new(1.5, 3.0, "General Kenobi"),
        ]))
    }

    struct Fixture {
        tmp: TempDir,
        repo: InMemoryJobRepository,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tmp: tempdir().unwrap(),
                repo: InMemoryJobRepository::new(),
            }
        }

        fn bucket(&self) -> PathBuf {
            self.tmp.path().join("bucket")
        }

        fn settings(&self) -> PipelineSettings {
            PipelineSettings {
                local_root: self.tmp.path().join("chunks"),
                output_root: self.tmp.path().join("output"),
                stage_timeout: Some(Duration::from_secs(30)),
                transfer_attempts: 1,
                transfer_backoff: Duration::ZERO,
            }
        }

        fn orchestrator(
            &self,
            transcriber: ScriptedTranscriber,
        ) -> PipelineOrchestrator<FsAdapter, ByteMedia, ScriptedTranscriber, InMemoryJobRepository>
        {
            PipelineOrchestrator::new(
                FsAdapter::new(self.bucket()),
                ByteMedia,
                transcriber,
                self.repo.clone(),
                self.settings(),
            )
        }

        /// Upload chunk objects for m1/1/u1, each holding its own stem.
        fn seed(&self, names: &[&str]) {
            let dir = self.bucket().join("recordings/m1/1/u1");
            std::fs::create_dir_all(&dir).unwrap();
            for name in names {
                let stem = name.split('.').next().unwrap();
                let tag = stem.replace("video_", "v").replace("audio_", "a");
                std::fs::write(dir.join(name), tag).unwrap();
            }
        }

        fn published(&self, name: &str) -> PathBuf {
            self.bucket().join("recordings/m1/1").join(name)
        }
    }

    fn request() -> JobRequest {
        JobRequest::new(NaturalKey::new("m1", "1", "u1").unwrap())
    }

    // Uploaded out of order.
    const CHUNKS: &[&str] = &[
        "video_2.webm",
        "audio_1.webm",
        "video_0.webm",
        "audio_0.webm",
        "video_1.webm",
        "audio_2.webm",
    ];

    #[tokio::test]
    async fn test_functional_full_run_publishes_and_cleans_up() {
        let fx = Fixture::new();
        fx.seed(CHUNKS);

        let result = fx.orchestrator(speech()).run(request()).await;

        assert!(result.succeeded(), "job failed: {:?}", result.state.error);
        assert_eq!(
            result.state.published,
            vec![
                "recordings/m1/1/u1.mp4".to_string(),
                "recordings/m1/1/u1.json".to_string(),
                "recordings/m1/1/u1.srt".to_string(),
            ]
        );

        let video = std::fs::read(fx.published("u1.mp4")).unwrap();
        assert_eq!(video, b"v0v1v2a0a1a2|subs");

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(fx.published("u1.json")).unwrap()).unwrap();
        assert_eq!(json["language"], "en");
        assert_eq!(json["segments"].as_array().unwrap().len(), 2);

        let srt = std::fs::read_to_string(fx.published("u1.srt")).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nHello there"));

        assert!(!result.config.local_work_dir.exists());
        assert!(!result.config.local_output_dir.exists());
        assert_eq!(result.state.outcome_of(Stage::CleaningUp), Some(&StageOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_functional_double_digit_indices_ordered_numerically() {
        let fx = Fixture::new();
        let mut names: Vec<String> = (0..11).map(|i| format!("video_{i}.webm")).collect();
        names.push("audio_0.webm".to_string());
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        fx.seed(&refs);

        let result = fx
            .orchestrator(ScriptedTranscriber(Some(Vec::new())))
            .run(request())
            .await;

        assert!(result.succeeded(), "job failed: {:?}", result.state.error);
        let video = String::from_utf8(std::fs::read(fx.published("u1.mp4")).unwrap()).unwrap();
        assert_eq!(video, "v0v1v2v3v4v5v6v7v8v9v10a0");
        // Silent audio: transcript document but no subtitles.
        assert!(fx.published("u1.json").exists());
        assert!(!fx.published("u1.srt").exists());
    }

    #[tokio::test]
    async fn test_functional_missing_recording_fails() {
        let fx = Fixture::new();

        let result = fx.orchestrator(speech()).run(request()).await;

        assert_eq!(result.state.stage, Stage::Failed);
        assert!(matches!(
            result.state.outcome_of(Stage::Fetching),
            Some(StageOutcome::Failed(_))
        ));
        assert!(!fx.published("u1.mp4").exists());
        assert!(!result.config.local_work_dir.exists());
    }

    #[tokio::test]
    async fn test_functional_gap_fails_organize() {
        let fx = Fixture::new();
        fx.seed(&["video_0.webm", "video_2.webm", "audio_0.webm"]);

        let result = fx.orchestrator(speech()).run(request()).await;

        assert_eq!(result.state.stage, Stage::Failed);
        let error = result.state.error.as_deref().unwrap();
        assert!(error.contains("expected index 1"), "{error}");
    }

    #[tokio::test]
    async fn test_functional_transcription_failure_publishes_video_only() {
        let fx = Fixture::new();
        fx.seed(CHUNKS);

        let result = fx.orchestrator(ScriptedTranscriber(None)).run(request()).await;

        assert!(result.succeeded());
        assert!(matches!(
            result.state.outcome_of(Stage::Transcribing),
            Some(StageOutcome::SkippedWithError(_))
        ));
        assert_eq!(std::fs::read(fx.published("u1.mp4")).unwrap(), b"v0v1v2a0a1a2");
        assert!(!fx.published("u1.json").exists());
    }

    #[tokio::test]
    async fn test_functional_without_speech_engine() {
        let fx = Fixture::new();
        fx.seed(CHUNKS);
        let orchestrator = PipelineOrchestrator::new(
            FsAdapter::new(fx.bucket()),
            ByteMedia,
            UnavailableTranscriber,
            fx.repo.clone(),
            fx.settings(),
        );

        let result = orchestrator.run(request()).await;

        assert!(result.succeeded());
        assert_eq!(result.state.published, vec!["recordings/m1/1/u1.mp4".to_string()]);
        match result.state.outcome_of(Stage::Transcribing) {
            Some(StageOutcome::SkippedWithError(reason)) => assert!(reason.contains("whisper")),
            other => panic!("unexpected transcription outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_functional_keep_intermediates() {
        let fx = Fixture::new();
        fx.seed(CHUNKS);
        let mut req = request();
        req.cleanup = false;
        req.skip_transcription = true;

        let result = fx.orchestrator(speech()).run(req).await;

        assert!(result.succeeded());
        assert!(result.config.chunks_dir().join("video_0.webm").exists());
        assert!(result.config.local_work_dir.join("audio.wav").exists());
        assert!(result.config.output_file("mp4").exists());
        assert_eq!(
            result.state.outcome_of(Stage::CleaningUp),
            Some(&StageOutcome::Skipped("cleanup disabled for this job".to_string()))
        );
    }

    #[tokio::test]
    async fn test_functional_submit_through_queue_and_worker() {
        let fx = Fixture::new();
        fx.seed(CHUNKS);

        let queue = ChannelQueue::new(4);
        let dispatcher = JobDispatcher::new(queue.clone(), fx.repo.clone(), &fx.settings());
        let worker = Arc::new(WorkerService::new(
            queue.clone(),
            Arc::new(fx.orchestrator(speech())),
        ));

        let shutdown = CancellationToken::new();
        let handle = {
            let worker = worker.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { worker.run_worker_loop(0, token).await })
        };

        let accepted = dispatcher
            .submit_raw(JobSubmission {
                meeting_id: Some("m1".into()),
                take: Some("1".into()),
                user_id: Some("u1".into()),
                whisper_model: Some("tiny".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let key = accepted.request.key.clone();
        let mut state = None;
        for _ in 0..500 {
            match dispatcher.status(&key).await.unwrap() {
                Some(s) if s.is_terminal() => {
                    state = Some(s);
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        let state = state.expect("job never finished");
        assert_eq!(state.stage, Stage::Succeeded);
        assert_eq!(state.run_id, accepted.run_id);
        assert!(fx.published("u1.mp4").exists());

        // The key is free again once the run is terminal.
        let again = dispatcher.submit(request()).await.unwrap();
        assert_ne!(again.run_id, accepted.run_id);

        // Closing drains the queued rerun before the worker exits.
        queue.close().await;
        handle.await.unwrap();
        let last = dispatcher.status(&key).await.unwrap().unwrap();
        assert_eq!(last.run_id, again.run_id);
        assert_eq!(last.stage, Stage::Succeeded);
    }
}
