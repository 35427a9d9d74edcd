//! Job execution domain types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One concrete attempt to run a script or step plan
///
/// Structure shared between server (persists) and agent (executes and updates).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobExecution {
    pub id: String,
    pub script: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub step_plan: Vec<JobStepPlanItem>,
    pub env: HashMap<String, String>,
    pub required_capabilities: HashMap<String, String>,
    pub timeout_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,
    pub artifact_globs: Vec<String>,
    pub caches: Vec<JobCacheSpec>,
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sensitive_values: Vec<String>,

    pub status: JobStatus,
    pub created_utc: DateTime<Utc>,
    pub leased_utc: Option<DateTime<Utc>>,
    pub started_utc: Option<DateTime<Utc>>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub leased_by_agent_id: String,
    pub exit_code: Option<i32>,
    pub error: String,
    pub output: String,
    pub current_step: String,
    pub cache_stats: Vec<JobCacheStats>,
    pub runtime_capabilities: HashMap<String, String>,
}

impl JobExecution {
    /// Copy of this execution with secret material removed
    ///
    /// Used for every read path except the lease response, which must carry
    /// the values the agent redacts from output.
    pub fn without_secrets(mut self) -> Self {
        self.sensitive_values.clear();
        if self.metadata.get(crate::domain::metadata::HAS_SECRETS).map(String::as_str) == Some("1")
        {
            for value in self.env.values_mut() {
                *value = "***".to_string();
            }
        }
        self
    }

    /// Metadata value or empty string
    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }

    /// True when the execution is gated by an external dependency
    pub fn is_blocked(&self) -> bool {
        self.meta(crate::domain::metadata::CHAIN_BLOCKED) == "1"
            || self.meta(crate::domain::metadata::NEEDS_BLOCKED) == "1"
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Leased,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Succeeded and failed are sticky: nothing moves a job out of them
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Statuses that may be deleted by a queue operation
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Leased)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "leased" => Ok(JobStatus::Leased),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Source checkout declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Kind of a step in a step plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    Run,
    Test,
    DryrunSkip,
}

/// Test report file format produced by a test step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestReportFormat {
    GoTestJson,
    JunitXml,
}

impl TestReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestReportFormat::GoTestJson => "go-test-json",
            TestReportFormat::JunitXml => "junit-xml",
        }
    }
}

/// Coverage file format produced by a test step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverageFormat {
    GoCoverprofile,
    Lcov,
}

impl CoverageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageFormat::GoCoverprofile => "go-coverprofile",
            CoverageFormat::Lcov => "lcov",
        }
    }
}

/// One named step inside a job's step plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStepPlanItem {
    pub name: String,
    pub script: String,
    pub env: HashMap<String, String>,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report_format: Option<TestReportFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_report_format: Option<CoverageFormat>,
}

/// Named cache declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCacheSpec {
    pub id: String,
    /// Environment variable the cache path is exposed under
    pub env: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restore_keys: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub ttl_days: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_size_mb: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Per-cache usage figures reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCacheStats {
    pub id: String,
    /// `hit`, `miss` or `fallback`
    pub source: String,
    pub path: String,
    pub files: u64,
    pub directories: u64,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tool_metrics: HashMap<String, String>,
}

/// Event attached to a job execution (step transitions etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub utc: DateTime<Utc>,
    #[serde(default)]
    pub step_index: usize,
    #[serde(default)]
    pub step_name: String,
    #[serde(default)]
    pub message: String,
}

impl JobEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            utc: Utc::now(),
            step_index: 0,
            step_name: String::new(),
            message: String::new(),
        }
    }

    pub fn for_step(mut self, index: usize, name: impl Into<String>) -> Self {
        self.step_index = index;
        self.step_name = name.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
