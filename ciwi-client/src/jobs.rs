//! Job-related API endpoints

use std::time::Duration;

use crate::ServerClient;
use crate::error::Result;
use ciwi_core::domain::job::JobExecution;
use ciwi_core::dto::artifact::{
    ArtifactsResponse, TestReportResponse, UploadArtifactsRequest, UploadTestReportRequest,
};
use ciwi_core::dto::job::{
    AffectedResponse, CreateJobExecution, JobEventsResponse, JobListResponse, StatusUpdate,
    UnmetRequirementsResponse,
};

impl ServerClient {
    // =============================================================================
    // Job Queue
    // =============================================================================

    /// Enqueue an ad-hoc job execution
    pub async fn enqueue_job(&self, req: &CreateJobExecution) -> Result<JobExecution> {
        let url = self.api_url("/jobs");
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Get the latest snapshot of a job execution
    pub async fn get_job(&self, job_id: &str) -> Result<JobExecution> {
        let url = self.api_url(&format!("/jobs/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all job executions, queued first
    pub async fn list_jobs(&self) -> Result<Vec<JobExecution>> {
        let url = self.api_url("/jobs");
        let response = self.client.get(&url).send().await?;

        let list: JobListResponse = self.handle_response(response).await?;
        Ok(list.job_executions)
    }

    /// Delete a queued or leased job
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}", job_id));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Delete every queued and leased job
    pub async fn clear_queue(&self) -> Result<u64> {
        let url = self.api_url("/jobs/clear-queue");
        let response = self.client.post(&url).send().await?;

        let affected: AffectedResponse = self.handle_response(response).await?;
        Ok(affected.affected)
    }

    /// Delete every terminal job
    pub async fn flush_history(&self) -> Result<u64> {
        let url = self.api_url("/jobs/flush-history");
        let response = self.client.post(&url).send().await?;

        let affected: AffectedResponse = self.handle_response(response).await?;
        Ok(affected.affected)
    }

    /// Clear the dependency gates of a blocked job
    pub async fn unblock_job(&self, job_id: &str) -> Result<JobExecution> {
        let url = self.api_url(&format!("/jobs/{}/unblock", job_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Explain why no agent is running a queued job
    pub async fn unmet_requirements(&self, job_id: &str) -> Result<Vec<String>> {
        let url = self.api_url(&format!("/jobs/{}/unmet", job_id));
        let response = self.client.get(&url).send().await?;

        let unmet: UnmetRequirementsResponse = self.handle_response(response).await?;
        Ok(unmet.reasons)
    }

    // =============================================================================
    // Job Execution (Agent-specific)
    // =============================================================================

    /// Post a status patch for a job
    pub async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}/status", job_id));
        let response = self.client.post(&url).json(update).send().await?;

        self.handle_empty_response(response).await
    }

    /// Post a status patch, bounding the whole request by `timeout`
    pub async fn update_status_with_timeout(
        &self,
        job_id: &str,
        update: &StatusUpdate,
        timeout: Duration,
    ) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}/status", job_id));
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(update)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Events recorded for a job
    pub async fn job_events(&self, job_id: &str) -> Result<JobEventsResponse> {
        let url = self.api_url(&format!("/jobs/{}/events", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Artifacts & Test Reports
    // =============================================================================

    /// Upload the artifacts of a job, replacing any earlier upload
    pub async fn upload_artifacts(&self, job_id: &str, req: &UploadArtifactsRequest) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}/artifacts", job_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// List the artifacts of a job
    pub async fn list_artifacts(&self, job_id: &str) -> Result<ArtifactsResponse> {
        let url = self.api_url(&format!("/jobs/{}/artifacts", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Download an artifact body from a (possibly relative) artifact URL
    pub async fn download_artifact(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.resolve_url(url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload a job's test report; last write wins
    pub async fn upload_test_report(&self, job_id: &str, req: &UploadTestReportRequest) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}/tests", job_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Get a job's test report
    pub async fn get_test_report(&self, job_id: &str) -> Result<TestReportResponse> {
        let url = self.api_url(&format!("/jobs/{}/tests", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
