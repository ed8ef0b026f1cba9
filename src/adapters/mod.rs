//! Adapters - Concrete implementations of ports.

pub mod aws;
pub mod ffmpeg;
pub mod http;
pub mod local;
pub mod whisper;
