//! Job DTOs for inter-service communication

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{
    JobCacheSpec, JobCacheStats, JobEvent, JobExecution, JobStatus, JobStepPlanItem, SourceSpec,
};

/// Request to enqueue a job execution (ad-hoc or from a pipeline trigger)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateJobExecution {
    pub script: String,
    pub step_plan: Vec<JobStepPlanItem>,
    pub env: HashMap<String, String>,
    pub required_capabilities: HashMap<String, String>,
    pub timeout_seconds: i64,
    pub source: Option<SourceSpec>,
    pub artifact_globs: Vec<String>,
    pub caches: Vec<JobCacheSpec>,
    pub metadata: HashMap<String, String>,
    pub sensitive_values: Vec<String>,
}

/// Status patch posted by the executing agent
///
/// Empty fields preserve what the server already stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdate {
    pub agent_id: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub current_step: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cache_stats: Vec<JobCacheStats>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub runtime_capabilities: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<JobEvent>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(agent_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobListResponse {
    pub job_executions: Vec<JobExecution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobEventsResponse {
    pub events: Vec<JobEvent>,
}

/// Reasons why no agent can take a queued job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnmetRequirementsResponse {
    pub job_id: String,
    pub reasons: Vec<String>,
}

/// Result of a bulk queue operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectedResponse {
    pub affected: u64,
}
