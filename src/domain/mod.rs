//! Domain layer - Pure business logic.

// Chunk naming and ordering
pub mod chunks;

// Job requests, natural keys and namespaces
pub mod jobs;

// Pipeline state machine
pub mod state;

// SRT and JSON transcript rendering
pub mod transcript;
