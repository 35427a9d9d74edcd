//! Artifact domain types

use serde::{Deserialize, Serialize};

/// An artifact stored for a job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArtifact {
    /// Path relative to the execution directory
    pub path: String,
    /// Download URL, resolved against the serving host
    #[serde(default)]
    pub url: String,
    pub size_bytes: i64,
}
