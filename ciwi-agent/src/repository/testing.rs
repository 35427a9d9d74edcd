//! In-memory repositories for engine and scheduler tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ciwi_client::{ClientError, Result};
use ciwi_core::domain::artifact::JobArtifact;
use ciwi_core::domain::job::JobExecution;
use ciwi_core::dto::agent::{HeartbeatRequest, HeartbeatResponse, LeaseRequest, LeaseResponse};
use ciwi_core::dto::artifact::{UploadArtifactsRequest, UploadTestReportRequest};
use ciwi_core::dto::job::StatusUpdate;

use super::{AgentRepository, JobRepository};

#[derive(Default)]
pub struct FakeJobRepository {
    pub updates: Mutex<Vec<StatusUpdate>>,
    /// Returned by `get_job`; `None` answers 404
    pub server_job: Mutex<Option<JobExecution>>,
    /// Artifacts of dependency jobs: job id -> (index entry, body)
    pub artifacts: Mutex<HashMap<String, Vec<(JobArtifact, Vec<u8>)>>>,
    pub uploaded_artifacts: Mutex<Vec<UploadArtifactsRequest>>,
    pub uploaded_reports: Mutex<Vec<UploadTestReportRequest>>,
    /// Number of upcoming bounded status posts that fail with a 503
    pub failing_reports: AtomicUsize,
    pub report_attempts: AtomicUsize,
}

impl FakeJobRepository {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<StatusUpdate> {
        self.updates.lock().unwrap().last().cloned()
    }

    pub fn add_artifact(&self, job_id: &str, path: &str, body: &[u8]) {
        let artifact = JobArtifact {
            path: path.to_string(),
            url: format!("/artifacts/{job_id}/{path}"),
            size_bytes: body.len() as i64,
        };
        self.artifacts
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push((artifact, body.to_vec()));
    }
}

#[async_trait]
impl JobRepository for FakeJobRepository {
    async fn update_status(&self, _job_id: &str, update: &StatusUpdate) -> Result<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn update_status_with_timeout(
        &self,
        job_id: &str,
        update: &StatusUpdate,
        _timeout: Duration,
    ) -> Result<()> {
        self.report_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_reports.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reports.store(failing - 1, Ordering::SeqCst);
            return Err(ClientError::api_error(503, "store busy"));
        }
        self.update_status(job_id, update).await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobExecution> {
        self.server_job
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::api_error(404, format!("job {job_id} not found")))
    }

    async fn list_artifacts(&self, job_id: &str) -> Result<Vec<JobArtifact>> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .get(job_id)
            .map(|items| items.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default())
    }

    async fn download_artifact(&self, url: &str) -> Result<Vec<u8>> {
        self.artifacts
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|(a, _)| a.url == url)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| ClientError::api_error(404, "no such artifact"))
    }

    async fn upload_artifacts(&self, _job_id: &str, req: &UploadArtifactsRequest) -> Result<()> {
        self.uploaded_artifacts.lock().unwrap().push(req.clone());
        Ok(())
    }

    async fn upload_test_report(&self, _job_id: &str, req: &UploadTestReportRequest) -> Result<()> {
        self.uploaded_reports.lock().unwrap().push(req.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAgentRepository {
    pub heartbeats: Mutex<Vec<HeartbeatRequest>>,
    pub heartbeat_replies: Mutex<VecDeque<HeartbeatResponse>>,
    pub leases: Mutex<VecDeque<JobExecution>>,
    pub lease_requests: AtomicUsize,
}

#[async_trait]
impl AgentRepository for FakeAgentRepository {
    async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.heartbeats.lock().unwrap().push(req.clone());
        Ok(self
            .heartbeat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| HeartbeatResponse::with_control(None)))
    }

    async fn lease(&self, _req: &LeaseRequest) -> Result<LeaseResponse> {
        self.lease_requests.fetch_add(1, Ordering::SeqCst);
        let job = self.leases.lock().unwrap().pop_front();
        Ok(LeaseResponse {
            assigned: job.is_some(),
            job_execution: job,
            message: String::new(),
        })
    }
}
