//! Artifact and test-report DTOs

use serde::{Deserialize, Serialize};

use crate::domain::artifact::JobArtifact;
use crate::domain::test_report::JobTestReport;

/// One artifact body in an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadArtifact {
    pub path: String,
    pub data_base64: String,
}

/// Artifact upload from the executing agent; replaces the job's artifact list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadArtifactsRequest {
    pub agent_id: String,
    pub artifacts: Vec<UploadArtifact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsResponse {
    pub artifacts: Vec<JobArtifact>,
}

/// Test report upload; last write wins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadTestReportRequest {
    pub agent_id: String,
    pub report: JobTestReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestReportResponse {
    pub report: Option<JobTestReport>,
}
