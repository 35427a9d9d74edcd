//! Error types for self-update

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors raised while discovering, verifying or applying an update
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The process is not in a state where it may replace itself
    #[error("update preflight failed: {0}")]
    Preflight(String),

    /// No release asset exists for this host
    #[error("no release asset for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("already running {0}")]
    AlreadyCurrent(String),

    #[error("release {0} not found")]
    ReleaseNotFound(String),

    #[error("release asset {0} not found")]
    AssetMissing(String),

    #[error("no checksum entry for {0}")]
    ChecksumMissing(String),

    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    #[error("release download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid staged manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("service manager error: {0}")]
    ServiceManager(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Permanent failures are reported and never retried
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Http(_) | Self::Io(_))
    }
}
