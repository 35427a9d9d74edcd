//! Repository layer
//!
//! Repositories are thin wrappers over the ciwi HTTP client. They give the
//! scheduler and the execution engine focused, trait-based interfaces so
//! both can be driven by in-memory fakes in tests.

mod agents;
mod jobs;

pub use agents::{AgentRepository, HttpAgentRepository};
pub use jobs::{HttpJobRepository, JobRepository};

#[cfg(test)]
pub(crate) mod testing;
