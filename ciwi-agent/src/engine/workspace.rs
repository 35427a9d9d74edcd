//! Per-job workspace isolation
//!
//! A pipeline job always lands in the same directory for a given project,
//! matrix entry and requirement fingerprint; ad-hoc jobs get one per job id.
//! The directory is wiped and recreated before every execution.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use ciwi_core::domain::job::JobExecution;
use ciwi_core::domain::metadata;

/// Requirement keys that decide the fingerprint when any is present
const FINGERPRINT_KEYS: [&str; 4] = ["arch", "executor", "os", "shell"];

/// 64-bit FNV-1a
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(PRIME)
    })
}

/// Canonical text of the requirements that select a runtime
///
/// Uses the platform keys when any is present, otherwise the full sorted map.
pub fn canonical_requirements(required: &HashMap<String, String>) -> String {
    let platform: BTreeMap<&str, &str> = FINGERPRINT_KEYS
        .iter()
        .filter_map(|k| required.get(*k).map(|v| (*k, v.trim())))
        .collect();

    let selected: BTreeMap<&str, &str> = if platform.is_empty() {
        required
            .iter()
            .map(|(k, v)| (k.as_str(), v.trim()))
            .collect()
    } else {
        platform
    };

    selected
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Short hex digest of the requirement fingerprint
pub fn fingerprint(required: &HashMap<String, String>) -> String {
    format!("{:08x}", fnv1a64(canonical_requirements(required).as_bytes()) as u32)
}

/// Replaces everything but `[A-Za-z0-9._-]`, collapsing to at most 64 chars
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Directory name of a job's workspace
pub fn workspace_key(job: &JobExecution) -> String {
    let pipeline_job = job.meta(metadata::PIPELINE_JOB_ID);
    if pipeline_job.is_empty() {
        return format!("adhoc-{}", sanitize_segment(&job.id));
    }

    let project = match job.meta(metadata::PROJECT_ID) {
        "" => job.meta(metadata::PROJECT_NAME),
        id => id,
    };

    let mut parts = vec![sanitize_segment(project), sanitize_segment(pipeline_job)];
    let matrix = match job.meta(metadata::MATRIX_NAME) {
        "" => job.meta(metadata::MATRIX_INDEX),
        name => name,
    };
    if !matrix.is_empty() {
        parts.push(sanitize_segment(matrix));
    }
    parts.push(fingerprint(&job.required_capabilities));
    parts.join("-")
}

/// Wipes and recreates the workspace of `job` under `jobs_dir`
pub async fn prepare(jobs_dir: &Path, job: &JobExecution) -> Result<PathBuf> {
    let dir = jobs_dir.join(workspace_key(job));
    if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("failed to clean workspace {}", dir.display()))?;
    }
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create workspace {}", dir.display()))?;
    Ok(dir)
}

/// Joins a relative path onto `root`, refusing anything that could escape it
pub fn safe_join(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = rel.trim().replace('\\', "/");
    if rel.is_empty() {
        return None;
    }
    let path = Path::new(&rel);
    if path.is_absolute() {
        return None;
    }

    let mut joined = root.to_path_buf();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(joined)
}
