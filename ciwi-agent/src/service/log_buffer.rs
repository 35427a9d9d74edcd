//! Output buffer service
//!
//! Collects the combined stdout/stderr of a job and the agent's own
//! breadcrumb lines. The script executor writes into it while the live
//! streamer and the terminal reporter take snapshots.

use std::sync::{Arc, Mutex, MutexGuard};

/// Service for accumulating job output
pub trait LogBufferService: Send + Sync {
    /// Appends raw bytes as produced by a process
    fn write(&self, bytes: &[u8]);

    /// Current contents as (lossily decoded) text
    fn snapshot(&self) -> String;

    /// Appends one line of text followed by a newline
    fn line(&self, text: &str) {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes);
    }
}

/// In-memory implementation of LogBufferService
///
/// Cloning shares the same underlying buffer.
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl InMemoryLogBuffer {
    /// Creates an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A writer that panicked leaves plain bytes behind; keep using them
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn write(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}
