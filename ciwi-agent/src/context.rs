//! Execution context for one leased job
//!
//! Holds everything the engine's sibling tasks share while a job runs:
//! - The job as leased
//! - The output buffer written by processes and read by the streamer
//! - The current step label
//! - The cancellation token tripped by the control-plane watcher
//! - Why the job was cancelled, if it was

use std::sync::{Arc, Mutex};

use ciwi_core::domain::job::JobExecution;
use tokio_util::sync::CancellationToken;

use crate::service::{InMemoryLogBuffer, LogBufferService};

/// Shared state of a running job
pub struct JobContext {
    pub job: JobExecution,
    pub agent_id: String,
    pub output: InMemoryLogBuffer,
    pub cancel: CancellationToken,
    current_step: Mutex<String>,
    cancel_reason: Mutex<Option<String>>,
}

impl JobContext {
    pub fn new(job: JobExecution, agent_id: impl Into<String>) -> Self {
        Self {
            job,
            agent_id: agent_id.into(),
            output: InMemoryLogBuffer::new(),
            cancel: CancellationToken::new(),
            current_step: Mutex::new(String::new()),
            cancel_reason: Mutex::new(None),
        }
    }

    /// Output buffer as a shareable sink for process readers
    pub fn sink(&self) -> Arc<dyn LogBufferService> {
        Arc::new(self.output.clone())
    }

    /// Writes one breadcrumb line into the job output
    pub fn log(&self, line: impl AsRef<str>) {
        self.output.line(line.as_ref());
    }

    pub fn current_step(&self) -> String {
        self.current_step
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set_current_step(&self, step: impl Into<String>) {
        if let Ok(mut current) = self.current_step.lock() {
            *current = step.into();
        }
    }

    /// Cancels the job; the first reason given is kept
    pub fn cancel_with(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.cancel_reason.lock()
            && slot.is_none()
        {
            *slot = Some(reason.into());
        }
        self.cancel.cancel();
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.lock().ok().and_then(|r| r.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
