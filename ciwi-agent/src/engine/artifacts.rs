//! Artifact collection and upload
//!
//! Expands the job's glob patterns below the execution directory, applies
//! the per-file and per-job caps, and uploads everything in one request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ciwi_core::dto::artifact::{UploadArtifact, UploadArtifactsRequest};

use super::workspace::safe_join;
use crate::repository::JobRepository;
use crate::service::LogBufferService;

/// Largest single artifact the agent uploads
pub const MAX_ARTIFACT_FILE_BYTES: u64 = 64 * 1024 * 1024;

/// Most artifacts uploaded per job
pub const MAX_ARTIFACT_FILES: usize = 2000;

/// A file selected for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedArtifact {
    /// Path relative to the execution directory, `/`-separated
    pub rel: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Relative `/`-separated path of `path` below `root`, if it stays inside
fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");
    // Round-trip through the path guard to refuse `..` and friends
    safe_join(root, &rel).map(|_| rel)
}

/// Files matched by `globs` below `root`, deduplicated and capped
pub fn collect(root: &Path, globs: &[String], output: &dyn LogBufferService) -> Result<Vec<CollectedArtifact>> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut selected: BTreeMap<String, CollectedArtifact> = BTreeMap::new();

    'patterns: for pattern in globs.iter().map(|g| g.trim()).filter(|g| !g.is_empty()) {
        let normalized = pattern.replace('\\', "/");
        if Path::new(&normalized).is_absolute() || normalized.split('/').any(|p| p == "..") {
            output.line(&format!("[artifacts] skipping unsafe pattern {pattern}"));
            continue;
        }

        let full = format!("{}/{}", escaped_root.trim_end_matches('/'), normalized);
        let matches =
            glob::glob(&full).with_context(|| format!("invalid artifact pattern {pattern}"))?;

        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    output.line(&format!("[artifacts] cannot read {}", e.path().display()));
                    continue;
                }
            };
            // Symlinks pointing outside the root are not followed
            let Ok(meta) = std::fs::symlink_metadata(&path) else { continue };
            if !meta.is_file() {
                continue;
            }
            let Some(rel) = relative_to(root, &path) else {
                output.line(&format!(
                    "[artifacts] skipping {} outside the workspace",
                    path.display()
                ));
                continue;
            };
            if selected.contains_key(&rel) {
                continue;
            }
            if meta.len() > MAX_ARTIFACT_FILE_BYTES {
                output.line(&format!(
                    "[artifacts] skipping {} ({} bytes exceeds the {} byte limit)",
                    rel,
                    meta.len(),
                    MAX_ARTIFACT_FILE_BYTES
                ));
                continue;
            }
            if selected.len() >= MAX_ARTIFACT_FILES {
                output.line(&format!(
                    "[artifacts] file limit of {MAX_ARTIFACT_FILES} reached, ignoring the rest"
                ));
                break 'patterns;
            }
            selected.insert(
                rel.clone(),
                CollectedArtifact {
                    rel,
                    path,
                    size: meta.len(),
                },
            );
        }
    }

    Ok(selected.into_values().collect())
}

/// Reads and uploads `artifacts` in a single request
pub async fn upload(
    repo: &dyn JobRepository,
    job_id: &str,
    agent_id: &str,
    artifacts: &[CollectedArtifact],
) -> Result<()> {
    let mut items = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .with_context(|| format!("failed to read artifact {}", artifact.rel))?;
        items.push(UploadArtifact {
            path: artifact.rel.clone(),
            data_base64: STANDARD.encode(bytes),
        });
    }

    let req = UploadArtifactsRequest {
        agent_id: agent_id.to_string(),
        artifacts: items,
    };
    repo.upload_artifacts(job_id, &req)
        .await
        .context("artifact upload failed")?;
    Ok(())
}
