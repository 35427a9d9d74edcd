//! Updater
//!
//! Downloads and verifies a release binary, then hands it to the service
//! manager (staged path) or to a helper copy of the running binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ciwi_core::version::Version;

use crate::asset::asset_name;
use crate::checksum::{sha256_hex, verify};
use crate::error::{Result, UpdateError};
use crate::helper::{HelperArgs, set_executable, spawn_helper};
use crate::manifest::StagedManifest;
use crate::release::{GithubReleases, ReleaseSource};
use crate::service::{self, ServiceManager};
use crate::settings::UpdateSettings;

/// How long the updated process waits before exiting for the helper
pub const EXIT_DELAY: Duration = Duration::from_millis(250);

/// What an update did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The helper is waiting; the caller must exit after `exit_after`
    HelperStarted { helper: PathBuf, exit_after: Duration },
    /// The service manager will swap the binary and restart the unit
    Staged { manifest: PathBuf },
}

/// Self-updater for the running binary
pub struct Updater {
    settings: UpdateSettings,
    releases: Arc<dyn ReleaseSource>,
    service: Arc<dyn ServiceManager>,
    current_version: String,
    current_exe: PathBuf,
    os: String,
    arch: String,
}

impl Updater {
    /// Updater for the running process, configured from `settings`
    pub fn new(settings: UpdateSettings, current_version: impl Into<String>) -> Result<Self> {
        let releases = Arc::new(GithubReleases::new(
            settings.api_base.clone(),
            settings.repository.clone(),
        ));
        let service: Arc<dyn ServiceManager> = Arc::from(service::detect(&settings));

        Ok(Self {
            settings,
            releases,
            service,
            current_version: current_version.into(),
            current_exe: std::env::current_exe()?,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })
    }

    pub fn with_release_source(mut self, releases: Arc<dyn ReleaseSource>) -> Self {
        self.releases = releases;
        self
    }

    pub fn with_service_manager(mut self, service: Arc<dyn ServiceManager>) -> Self {
        self.service = service;
        self
    }

    pub fn with_current_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_exe = path.into();
        self
    }

    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    pub fn service_manager(&self) -> &dyn ServiceManager {
        self.service.as_ref()
    }

    /// Refuse to replace development builds or unsupervised processes
    pub fn preflight(&self) -> Result<()> {
        if looks_like_dev_build(&self.current_exe) {
            return Err(UpdateError::Preflight(format!(
                "{} looks like a development build",
                self.current_exe.display()
            )));
        }
        if !self.service.is_service_mode() {
            return Err(UpdateError::Preflight(format!(
                "not running under a service manager ({})",
                self.service.name()
            )));
        }
        Ok(())
    }

    /// Update to release `target`
    ///
    /// `restart_args` are the arguments the new binary is relaunched with on
    /// the helper path.
    pub async fn update_to(&self, target: &str, restart_args: Vec<String>) -> Result<UpdateOutcome> {
        let target = target.trim();
        let Some(target_version) = Version::parse(target) else {
            return Err(UpdateError::Preflight(format!(
                "invalid update target {target:?}"
            )));
        };
        if Version::parse(&self.current_version).as_ref() == Some(&target_version) {
            return Err(UpdateError::AlreadyCurrent(self.current_version.clone()));
        }
        self.preflight()?;

        let asset = asset_name(&self.os, &self.arch).ok_or_else(|| {
            UpdateError::UnsupportedPlatform {
                os: self.os.clone(),
                arch: self.arch.clone(),
            }
        })?;

        tracing::info!(version = %target, asset = %asset, "Fetching update");
        let release = self.releases.release_by_tag(target).await?;
        let binary_asset = release
            .find_asset(&asset)
            .ok_or_else(|| UpdateError::AssetMissing(asset.clone()))?;

        let checksum_asset = self
            .settings
            .checksum_candidates()
            .iter()
            .find_map(|name| release.find_asset(name))
            .cloned();

        let listing = match checksum_asset {
            Some(listing) => {
                let bytes = self.releases.download(&listing).await?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            None if self.settings.require_checksum => {
                return Err(UpdateError::ChecksumMissing(asset));
            }
            None => {
                tracing::warn!(asset = %asset, "Release has no checksum listing");
                None
            }
        };

        let bytes = self.releases.download(binary_asset).await?;
        if let Some(listing) = &listing {
            verify(&bytes, listing, &asset)?;
        }

        let staged = self.write_staged(&asset, target, &bytes)?;

        if self.service.supports_staging() && !self.settings.service_name.is_empty() {
            let manifest = StagedManifest {
                target_version: target.to_string(),
                asset_name: asset,
                staged_sha256: sha256_hex(&bytes),
                staged_binary: staged,
                target_binary: self.current_exe.clone(),
                service_label: self.settings.service_name.clone(),
                service_pid: std::process::id(),
                requested_at: Utc::now(),
            };
            let path = self.settings.staged_manifest.clone();
            self.service.stage_update(&manifest, &path)?;
            self.service.trigger_update()?;

            tracing::info!(manifest = %path.display(), "Update staged");
            return Ok(UpdateOutcome::Staged { manifest: path });
        }

        let helper = spawn_helper(
            &self.current_exe,
            &HelperArgs {
                target: self.current_exe.clone(),
                new: staged,
                pid: std::process::id(),
                args: restart_args,
            },
        )?;
        Ok(UpdateOutcome::HelperStarted {
            helper,
            exit_after: EXIT_DELAY,
        })
    }

    fn write_staged(&self, asset: &str, target: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.settings.staging_dir)?;
        let path = self.settings.staging_dir.join(format!("{asset}-{target}"));
        std::fs::write(&path, bytes)?;
        set_executable(&path)?;
        Ok(path)
    }
}

/// Binaries run straight out of a build cache cannot be replaced
pub fn looks_like_dev_build(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    ["/go-build", "/TEMP/", "/target/debug/"]
        .iter()
        .any(|marker| normalized.contains(marker))
}
