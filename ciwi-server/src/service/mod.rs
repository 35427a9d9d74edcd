//! Service Module
//!
//! Business logic layer of the server.
//! Services orchestrate between repositories and contain domain logic.

pub mod agent;
pub mod artifact;
pub mod job;
pub mod maintenance;
pub mod project;
pub mod secret;
pub mod update;
pub mod watch;

// Re-export for convenience
pub use agent as agent_service;
pub use artifact as artifact_service;
pub use job as job_service;
pub use project as project_service;
pub use secret as secret_service;
pub use update as update_service;
pub use watch as watch_service;
