//! Local adapters for single-process deployment.

pub mod fs;
pub mod memory;
pub mod queue;

pub use fs::FsAdapter;
pub use memory::InMemoryJobRepository;
pub use queue::ChannelQueue;
