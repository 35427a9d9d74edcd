//! Service layer
//!
//! Services contain the agent's business logic. They orchestrate the engine
//! and the repositories: job execution, capability discovery, control
//! directives and output buffering.
//!
//! All services are trait-based to enable testing and dependency injection.

mod capabilities;
mod control;
mod execution;
mod log_buffer;

// Re-export traits
pub use capabilities::CapabilitiesService;
pub use control::{ControlService, SelfUpdate};
pub use execution::ExecutionService;
pub use log_buffer::LogBufferService;

// Re-export implementations
pub use capabilities::StandardCapabilitiesService;
pub use control::{ControlReport, ReleaseSelfUpdate, StandardControlService};
pub use execution::{JobOutcome, StandardExecutionService, TIMED_OUT};
pub use log_buffer::InMemoryLogBuffer;
