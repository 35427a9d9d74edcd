//! Job execution engine
//!
//! Building blocks the execution service composes for one leased job:
//! workspace isolation, source checkout, dependency artifacts, caches, the
//! runtime container and tool probes, process supervision, live output,
//! artifact upload and terminal reporting.

pub mod artifacts;
pub mod cache;
pub mod checkout;
pub mod container;
pub mod deps;
pub mod probe;
pub mod process;
pub mod reporter;
pub mod shell;
pub mod streamer;
pub mod watcher;
pub mod workspace;

pub use process::{ProcessOutcome, ProcessSpec, run_process};
pub use shell::Shell;
