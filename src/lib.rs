//! Stitcher - Meeting recording assembly service
//!
//! Fetches the video and audio chunks a conferencing client uploaded for one
//! participant, stitches them into a single MP4 with soft captions and
//! publishes the result back to object storage.
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, chunks, state, transcript)
//! - ports/: Trait definitions (storage, media, transcription, queue, repository)
//! - adapters/: Concrete implementations (S3/R2, local fs, ffmpeg, whisper, HTTP)
//! - application/: Generic services (orchestrator, dispatcher, worker)
//! - config: Environment configuration
//!
//! # Features
//! - `whisper` (default): speech recognition through whisper.cpp

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports for convenience
pub use application::orchestrator::{JobResult, PipelineOrchestrator};
pub use config::ServiceConfig;
