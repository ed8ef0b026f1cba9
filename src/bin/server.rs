//! Stitcher server binary
//!
//! Wires up:
//! - Storage (R2/S3 or a local bucket directory)
//! - ffmpeg media engine and whisper transcriber
//! - In-process job queue drained by a pool of workers
//! - HTTP submission API
//!
//! Configuration comes from the environment (see `config.rs`).

use stitcher::adapters::aws::s3::S3Adapter;
use stitcher::adapters::ffmpeg::FfmpegEngine;
use stitcher::adapters::http::router;
use stitcher::adapters::local::{ChannelQueue, FsAdapter, InMemoryJobRepository};
use stitcher::application::dispatcher::JobDispatcher;
use stitcher::application::orchestrator::PipelineOrchestrator;
use stitcher::application::worker::WorkerService;
use stitcher::config::{ServiceConfig, StorageBackend};
use stitcher::ports::storage::StoragePort;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "whisper")]
use stitcher::adapters::whisper::WhisperTranscriber;
#[cfg(not(feature = "whisper"))]
use stitcher::adapters::whisper::UnavailableTranscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;

    match config.storage.clone() {
        StorageBackend::S3(settings) => {
            info!(endpoint = %settings.endpoint_url, bucket = %settings.bucket, "using S3 storage");
            let storage = S3Adapter::from_settings(&settings).await;
            serve(config, storage).await
        }
        StorageBackend::Fs { bucket_dir } => {
            info!(dir = %bucket_dir.display(), "using local bucket directory");
            serve(config, FsAdapter::new(bucket_dir)).await
        }
    }
}

async fn serve<S>(config: ServiceConfig, storage: S) -> Result<(), Box<dyn Error + Send + Sync>>
where
    S: StoragePort + 'static,
{
    // 1. Adapters
    let queue = ChannelQueue::new(config.queue_capacity);
    let repo = InMemoryJobRepository::new();
    let media = FfmpegEngine::new(&config.ffmpeg_bin);

    #[cfg(feature = "whisper")]
    let transcriber = WhisperTranscriber::new(&config.whisper_model_dir);
    #[cfg(not(feature = "whisper"))]
    let transcriber = UnavailableTranscriber;

    // 2. Application services
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        storage,
        media,
        transcriber,
        repo.clone(),
        config.pipeline.clone(),
    ));
    let worker = Arc::new(WorkerService::new(queue.clone(), orchestrator));
    let dispatcher = Arc::new(JobDispatcher::new(queue.clone(), repo, &config.pipeline));

    // 3. Start workers
    let shutdown = CancellationToken::new();
    let mut workers = Vec::with_capacity(config.workers_count);
    for i in 0..config.workers_count {
        let w = worker.clone();
        let token = shutdown.clone();
        workers.push(tokio::spawn(async move {
            w.run_worker_loop(i, token).await;
        }));
    }
    info!(count = config.workers_count, "started pipeline workers");

    // 4. HTTP layer
    let app = router(dispatcher.clone());
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port)).await?;
    info!("Listening at {}:{}", config.addr, config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    // 5. Drain: queued jobs still run. A second Ctrl-C stops the workers after
    // the job in hand and abandons the rest.
    info!("shutdown requested, draining queued jobs");
    queue.close().await;
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("second shutdown signal, stopping after jobs in progress");
            token.cancel();
        }
    });

    for handle in workers {
        handle.await?;
    }
    let abandoned = dispatcher.abandon_queued().await;
    info!(abandoned, "all workers stopped");
    Ok(())
}
