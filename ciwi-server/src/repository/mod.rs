//! Repository Module
//!
//! Data access layer for the server.
//! Each repository handles database operations for a specific domain entity.

pub mod app_state;
pub mod artifact;
pub mod job;
pub mod project;
pub mod test_report;
pub mod vault;

// Re-export for convenience
pub use app_state as app_state_repository;
pub use artifact as artifact_repository;
pub use job as job_repository;
pub use project as project_repository;
pub use test_report as test_report_repository;
pub use vault as vault_repository;
