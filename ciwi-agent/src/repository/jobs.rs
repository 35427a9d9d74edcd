//! Jobs repository
//!
//! Everything the execution engine says to the server about one job:
//! status patches, the control-plane poll, dependency artifacts, and the
//! artifact and test-report uploads.

use std::time::Duration;

use async_trait::async_trait;
use ciwi_client::{Result, ServerClient};
use ciwi_core::domain::artifact::JobArtifact;
use ciwi_core::domain::job::JobExecution;
use ciwi_core::dto::artifact::{UploadArtifactsRequest, UploadTestReportRequest};
use ciwi_core::dto::job::StatusUpdate;

/// Repository trait for job-related operations with the server
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Posts a status patch
    async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<()>;

    /// Posts a status patch bounded by `timeout`
    async fn update_status_with_timeout(
        &self,
        job_id: &str,
        update: &StatusUpdate,
        timeout: Duration,
    ) -> Result<()>;

    /// Latest server-side snapshot of a job
    async fn get_job(&self, job_id: &str) -> Result<JobExecution>;

    /// Artifact index of a (dependency) job
    async fn list_artifacts(&self, job_id: &str) -> Result<Vec<JobArtifact>>;

    /// Body of one artifact, addressed by the URL from the index
    async fn download_artifact(&self, url: &str) -> Result<Vec<u8>>;

    /// Uploads the collected artifacts of a job
    async fn upload_artifacts(&self, job_id: &str, req: &UploadArtifactsRequest) -> Result<()>;

    /// Uploads the parsed test report of a job
    async fn upload_test_report(&self, job_id: &str, req: &UploadTestReportRequest) -> Result<()>;
}

/// HTTP implementation of JobRepository
#[derive(Clone)]
pub struct HttpJobRepository {
    client: ServerClient,
}

impl HttpJobRepository {
    pub fn new(client: ServerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<()> {
        self.client.update_status(job_id, update).await
    }

    async fn update_status_with_timeout(
        &self,
        job_id: &str,
        update: &StatusUpdate,
        timeout: Duration,
    ) -> Result<()> {
        self.client
            .update_status_with_timeout(job_id, update, timeout)
            .await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobExecution> {
        self.client.get_job(job_id).await
    }

    async fn list_artifacts(&self, job_id: &str) -> Result<Vec<JobArtifact>> {
        Ok(self.client.list_artifacts(job_id).await?.artifacts)
    }

    async fn download_artifact(&self, url: &str) -> Result<Vec<u8>> {
        self.client.download_artifact(url).await
    }

    async fn upload_artifacts(&self, job_id: &str, req: &UploadArtifactsRequest) -> Result<()> {
        self.client.upload_artifacts(job_id, req).await
    }

    async fn upload_test_report(&self, job_id: &str, req: &UploadTestReportRequest) -> Result<()> {
        self.client.upload_test_report(job_id, req).await
    }
}
