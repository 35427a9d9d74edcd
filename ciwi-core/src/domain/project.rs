//! Project, pipeline and pipeline-job domain types
//!
//! A project owns pipelines; a pipeline owns ordered pipeline jobs; each
//! pipeline job owns an ordered step list and a matrix include list.
//! The same structures double as the YAML config schema.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{CoverageFormat, JobCacheSpec, StepKind, TestReportFormat};

/// Persisted project row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_url: String,
    pub repo_ref: String,
    pub config_file: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Project with its full pipeline tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDetail {
    pub project: Project,
    pub pipelines: Vec<PipelineDetail>,
    pub secrets: Vec<ProjectSecretSpec>,
}

/// Pipeline with its ordered jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDetail {
    /// Database id
    pub id: i64,
    /// Config id, unique within the project
    pub pipeline_id: String,
    pub source_repo: String,
    pub source_ref: String,
    pub jobs: Vec<PipelineJob>,
}

/// One job of a pipeline as declared in the config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineJob {
    pub id: String,
    pub runs_on: BTreeMap<String, String>,
    pub requires: PipelineJobRequirements,
    pub timeout_seconds: i64,
    pub artifacts: Vec<String>,
    pub caches: Vec<JobCacheSpec>,
    /// Ids of pipeline jobs in the same pipeline that must succeed first
    pub needs: Vec<String>,
    pub matrix: PipelineMatrix,
    pub steps: Vec<PipelineStep>,
}

/// Tool and container requirements of a pipeline job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineJobRequirements {
    /// Tool name to version constraint (`>=1.24`, `*`, ...)
    pub tools: BTreeMap<String, String>,
    pub container: Option<ContainerRequirement>,
}

/// Runtime container a job's steps execute in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerRequirement {
    pub image: String,
    pub workdir: String,
    pub user: String,
    pub devices: Vec<String>,
    pub groups: Vec<String>,
    pub tools: BTreeMap<String, String>,
}

/// Matrix expansion of a pipeline job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineMatrix {
    pub include: Vec<BTreeMap<String, String>>,
}

/// One step of a pipeline job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineStep {
    pub name: String,
    pub run: String,
    pub env: BTreeMap<String, String>,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_format: Option<TestReportFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_format: Option<CoverageFormat>,
}

/// Secret a project needs at enqueue time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSecretSpec {
    /// Environment variable the value is exposed as
    pub name: String,
    pub vault_connection: String,
    pub path: String,
    pub key: String,
}

/// Stored vault connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConnection {
    pub name: String,
    pub url: String,
    pub auth_method: String,
    pub role_id: String,
    /// Environment variable holding the secret id on the server host
    pub secret_id_env: String,
}

/// Short listing entry for projects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub repo_url: String,
    pub pipelines: Vec<String>,
}
