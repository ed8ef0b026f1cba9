//! Ports - Trait definitions for the services the pipeline talks to.

pub mod media;
pub mod queue;
pub mod repository;
pub mod storage;
pub mod transcription;
