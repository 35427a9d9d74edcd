//! Dependency artifacts
//!
//! Jobs that depend on earlier jobs receive their ids in
//! `CIWI_DEP_ARTIFACT_JOB_ID(S)`; every artifact of those jobs is
//! downloaded into the execution directory before the script runs.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use ciwi_core::domain::metadata::{DEP_ARTIFACT_JOB_ID_ENV, DEP_ARTIFACT_JOB_IDS_ENV};

use super::workspace::safe_join;
use crate::repository::JobRepository;
use crate::service::LogBufferService;

/// Dependency job ids named in the job environment, in order, without repeats
pub fn dependency_job_ids(env: &HashMap<String, String>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for key in [DEP_ARTIFACT_JOB_ID_ENV, DEP_ARTIFACT_JOB_IDS_ENV] {
        let Some(raw) = env.get(key) else { continue };
        for id in raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Downloads the artifacts of every dependency job into `exec_dir`
///
/// Returns the number of files written.
pub async fn download_dependency_artifacts(
    repo: &dyn JobRepository,
    job_ids: &[String],
    exec_dir: &Path,
    output: &dyn LogBufferService,
) -> Result<usize> {
    let mut written = 0;
    for dep in job_ids {
        let artifacts = repo
            .list_artifacts(dep)
            .await
            .with_context(|| format!("failed to list artifacts of job {dep}"))?;
        output.line(&format!(
            "[deps] job {}: {} artifact(s)",
            dep,
            artifacts.len()
        ));

        for artifact in artifacts {
            let Some(dest) = safe_join(exec_dir, &artifact.path) else {
                bail!("unsafe artifact path {:?} from job {}", artifact.path, dep);
            };
            let body = repo
                .download_artifact(&artifact.url)
                .await
                .with_context(|| format!("failed to download {} from job {}", artifact.path, dep))?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &body)
                .await
                .with_context(|| format!("failed to write {}", dest.display()))?;
            written += 1;
        }
    }
    Ok(written)
}
