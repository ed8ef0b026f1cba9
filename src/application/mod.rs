//! Application layer - Services generic over the ports.

pub mod dispatcher;
pub mod errors;
mod functional_tests;
pub mod orchestrator;
pub mod retry;
pub mod worker;
