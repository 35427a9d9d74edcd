//! Artifact Service
//!
//! Stores uploaded artifact bodies under `<root>/<job_id>/` and keeps the
//! index in the database. Test reports share the same ownership rules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ciwi_core::domain::artifact::JobArtifact;
use ciwi_core::domain::job::JobExecution;
use ciwi_core::domain::test_report::JobTestReport;
use ciwi_core::dto::artifact::{UploadArtifactsRequest, UploadTestReportRequest};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::repository::artifact::ArtifactRecord;
use crate::repository::{artifact_repository, job_repository, test_report_repository};

/// Largest accepted artifact body
pub const MAX_ARTIFACT_BYTES: usize = 64 * 1024 * 1024;
/// Most artifacts accepted for one job
pub const MAX_ARTIFACTS_PER_JOB: usize = 2000;

const STAGING_DIR: &str = ".staging";

/// One lock per job directory; entries die with their last holder
static UPLOAD_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn upload_lock(target: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = UPLOAD_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    locks.retain(|_, lock| lock.strong_count() > 0);
    if let Some(lock) = locks.get(target).and_then(Weak::upgrade) {
        return lock;
    }
    let lock = Arc::new(tokio::sync::Mutex::new(()));
    locks.insert(target.to_path_buf(), Arc::downgrade(&lock));
    lock
}

/// Service error type
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("artifact storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Normalise an artifact path, rejecting anything that could leave the job dir
pub fn sanitize_artifact_path(raw: &str) -> Result<String, ArtifactError> {
    let invalid = || ArtifactError::Validation(format!("invalid artifact path: {raw:?}"));

    let normalized = raw.trim().replace('\\', "/");
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains('\0') {
        return Err(invalid());
    }
    // Windows drive prefix such as `C:`
    if normalized.as_bytes().get(1) == Some(&b':') {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid()),
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

/// Store an upload, replacing every artifact previously stored for the job
pub async fn save_artifacts(
    pool: &SqlitePool,
    root: &Path,
    job_id: &str,
    req: UploadArtifactsRequest,
) -> Result<usize, ArtifactError> {
    let job = owned_job(pool, job_id, &req.agent_id).await?;

    if req.artifacts.len() > MAX_ARTIFACTS_PER_JOB {
        return Err(ArtifactError::Validation(format!(
            "too many artifacts: {} (max {MAX_ARTIFACTS_PER_JOB})",
            req.artifacts.len()
        )));
    }

    let mut decoded = Vec::with_capacity(req.artifacts.len());
    for artifact in &req.artifacts {
        let path = sanitize_artifact_path(&artifact.path)?;
        let data = STANDARD.decode(artifact.data_base64.trim()).map_err(|e| {
            ArtifactError::Validation(format!("artifact {path}: invalid base64: {e}"))
        })?;
        if data.len() > MAX_ARTIFACT_BYTES {
            return Err(ArtifactError::Validation(format!(
                "artifact {path} exceeds {MAX_ARTIFACT_BYTES} bytes"
            )));
        }
        decoded.push((path, data));
    }
    decoded.sort_by(|a, b| a.0.cmp(&b.0));
    decoded.dedup_by(|a, b| a.0 == b.0);

    let staging = root
        .join(STAGING_DIR)
        .join(format!("{}-{}", job.id, uuid::Uuid::new_v4()));
    let records = match write_staged(&staging, &job.id, &decoded).await {
        Ok(records) => records,
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
    };

    // Disk swap and index rewrite must not interleave with another upload
    let target = root.join(&job.id);
    let lock = upload_lock(&target);
    let _guard = lock.lock().await;
    if let Err(e) = swap_into_place(&staging, &target).await {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e.into());
    }
    artifact_repository::replace_for_job(pool, &job.id, &records).await?;

    tracing::info!(job_id = %job.id, count = records.len(), "Artifacts stored");
    Ok(records.len())
}

async fn swap_into_place(staging: &Path, target: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(target).await? {
        tokio::fs::remove_dir_all(target).await?;
    }
    tokio::fs::rename(staging, target).await
}

async fn write_staged(
    staging: &Path,
    job_id: &str,
    files: &[(String, Vec<u8>)],
) -> std::io::Result<Vec<ArtifactRecord>> {
    tokio::fs::create_dir_all(staging).await?;

    let mut records = Vec::with_capacity(files.len());
    for (path, data) in files {
        let dest: PathBuf = staging.join(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, data).await?;

        records.push(ArtifactRecord {
            path: path.clone(),
            stored_rel: format!("{job_id}/{path}"),
            size_bytes: data.len() as i64,
        });
    }
    Ok(records)
}

/// Artifacts of a job with their download URLs
pub async fn list_artifacts(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<Vec<JobArtifact>, ArtifactError> {
    require_job(pool, job_id).await?;

    let records = artifact_repository::list_for_job(pool, job_id).await?;
    Ok(records
        .into_iter()
        .map(|r| JobArtifact {
            url: artifact_url(&r.stored_rel),
            path: r.path,
            size_bytes: r.size_bytes,
        })
        .collect())
}

/// Download URL of a stored artifact, relative to the serving host
pub fn artifact_url(stored_rel: &str) -> String {
    let encoded: Vec<String> = stored_rel.split('/').map(encode_segment).collect();
    format!("/artifacts/{}", encoded.join("/"))
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Store the test report of a job; the last write wins
pub async fn save_test_report(
    pool: &SqlitePool,
    job_id: &str,
    req: UploadTestReportRequest,
) -> Result<(), ArtifactError> {
    let job = owned_job(pool, job_id, &req.agent_id).await?;
    test_report_repository::upsert(pool, &job.id, &req.report).await?;

    tracing::info!(
        job_id = %job.id,
        total = req.report.total,
        failed = req.report.failed,
        "Test report stored"
    );
    Ok(())
}

/// Test report of a job, if one was uploaded
pub async fn get_test_report(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<Option<JobTestReport>, ArtifactError> {
    require_job(pool, job_id).await?;
    Ok(test_report_repository::find_by_job(pool, job_id).await?)
}

async fn require_job(pool: &SqlitePool, job_id: &str) -> Result<JobExecution, ArtifactError> {
    job_repository::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| ArtifactError::NotFound(format!("job {job_id}")))
}

/// The job, provided `agent_id` is the agent it was leased to
async fn owned_job(
    pool: &SqlitePool,
    job_id: &str,
    agent_id: &str,
) -> Result<JobExecution, ArtifactError> {
    if agent_id.trim().is_empty() {
        return Err(ArtifactError::Validation("agent_id is required".to_string()));
    }
    let job = require_job(pool, job_id).await?;
    if !job.leased_by_agent_id.is_empty() && job.leased_by_agent_id != agent_id.trim() {
        return Err(ArtifactError::Conflict(format!(
            "job {job_id} is leased by another agent"
        )));
    }
    Ok(job)
}
