//! Staged update manifests
//!
//! A running service stages a verified binary and a manifest; the
//! privileged updater consumes the manifest, swaps the binary and restarts
//! the unit.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::sha256_hex;
use crate::error::{Result, UpdateError};
use crate::helper::swap_binaries;
use crate::service::ServiceManager;

/// Manifest describing one staged update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedManifest {
    pub target_version: String,
    pub asset_name: String,
    pub staged_binary: PathBuf,
    pub staged_sha256: String,
    /// Binary the staged file replaces
    pub target_binary: PathBuf,
    /// systemd unit or launchd label to restart
    #[serde(alias = "agent_label")]
    pub service_label: String,
    #[serde(alias = "agent_pid")]
    pub service_pid: u32,
    pub requested_at: DateTime<Utc>,
}

impl StagedManifest {
    /// Write the manifest via a temp file and rename
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|e| UpdateError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a manifest; `None` when there is nothing staged
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| UpdateError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Apply the update staged at `manifest_path`
///
/// Verifies the staged binary, swaps it over the target (keeping a `.bak`),
/// restarts the service and clears the manifest. Returns `None` when no
/// update is staged.
pub fn apply_staged(
    manifest_path: &Path,
    service: &dyn ServiceManager,
) -> Result<Option<StagedManifest>> {
    let Some(manifest) = StagedManifest::read(manifest_path)? else {
        tracing::info!(path = %manifest_path.display(), "No staged update");
        return Ok(None);
    };

    let staged = std::fs::read(&manifest.staged_binary)?;
    let actual = sha256_hex(&staged);
    if actual != manifest.staged_sha256.to_ascii_lowercase() {
        return Err(UpdateError::ChecksumMismatch {
            asset: manifest.asset_name.clone(),
            expected: manifest.staged_sha256.clone(),
            actual,
        });
    }

    let backup = swap_binaries(&manifest.target_binary, &manifest.staged_binary)?;
    service.prepare_binary(&manifest.target_binary)?;

    if let Err(e) = service.restart(&manifest.service_label) {
        tracing::error!("Restart after staged update failed, rolling back: {}", e);
        crate::helper::rollback(&manifest.target_binary, &backup)?;
        return Err(e);
    }

    std::fs::remove_file(manifest_path)?;
    tracing::info!(
        version = %manifest.target_version,
        binary = %manifest.target_binary.display(),
        "Staged update applied"
    );
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::RecordingService;

    fn manifest(dir: &Path, staged_bytes: &[u8]) -> StagedManifest {
        let staged = dir.join("ciwi-linux-amd64-v2.0.0");
        std::fs::write(&staged, staged_bytes).unwrap();
        let target = dir.join("ciwi");
        std::fs::write(&target, b"old").unwrap();

        StagedManifest {
            target_version: "v2.0.0".to_string(),
            asset_name: "ciwi-linux-amd64".to_string(),
            staged_binary: staged,
            staged_sha256: sha256_hex(b"new"),
            target_binary: target,
            service_label: "ciwi-agent.service".to_string(),
            service_pid: 42,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_manifest_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pending.json");
        assert_eq!(StagedManifest::read(&path).unwrap(), None);

        let m = manifest(dir.path(), b"new");
        m.write_atomic(&path).unwrap();
        assert_eq!(StagedManifest::read(&path).unwrap(), Some(m));
    }

    #[test]
    fn test_manifest_accepts_agent_field_names() {
        let json = r#"{
            "target_version": "v1.0.0", "asset_name": "a", "staged_binary": "/s",
            "staged_sha256": "00", "target_binary": "/t", "agent_label": "io.ciwi.agent",
            "agent_pid": 7, "requested_at": "2026-01-01T00:00:00Z"
        }"#;
        let m: StagedManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.service_label, "io.ciwi.agent");
        assert_eq!(m.service_pid, 7);
    }

    #[test]
    fn test_apply_staged_swaps_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let m = manifest(dir.path(), b"new");
        m.write_atomic(&path).unwrap();

        let service = RecordingService::default();
        let applied = apply_staged(&path, &service).unwrap().unwrap();

        assert_eq!(applied.target_version, "v2.0.0");
        assert_eq!(std::fs::read(&m.target_binary).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.path().join("ciwi.bak")).unwrap(), b"old");
        assert_eq!(service.restarted(), vec!["ciwi-agent.service"]);
        assert!(!path.exists());
    }

    #[test]
    fn test_apply_staged_rejects_tampered_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let m = manifest(dir.path(), b"evil");
        m.write_atomic(&path).unwrap();

        let service = RecordingService::default();
        assert!(matches!(
            apply_staged(&path, &service),
            Err(UpdateError::ChecksumMismatch { .. })
        ));
        assert_eq!(std::fs::read(&m.target_binary).unwrap(), b"old");
        assert!(service.restarted().is_empty());
    }
}
