//! Project DTOs

use serde::{Deserialize, Serialize};

/// Load (or reload) a project from its YAML config text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProjectRequest {
    pub config_yaml: String,
    /// Name of the file the config came from, kept for display
    pub config_file: String,
}

/// Trigger a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPipelineRequest {
    /// Overrides the pipeline's source ref
    pub source_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPipelineResponse {
    pub job_execution_ids: Vec<String>,
}
