//! Control directives
//!
//! Applies what the server asked for in a heartbeat response: self-update,
//! restart, cache wipe, job history wipe. The poller only calls this while
//! no job runs; directives received mid-job wait in its queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ciwi_core::control::AgentControl;
use ciwi_update::{UpdateError, UpdateOutcome, UpdateSettings, Updater};
use tracing::{info, warn};

use crate::config::AgentConfig;

/// Delay before exiting for a service-manager restart
pub const RESTART_DELAY: Duration = Duration::from_millis(250);

/// Result of applying a directive, reported on the next heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlReport {
    pub update_failure: Option<String>,
    pub restart_status: Option<String>,
    /// The agent must exit after this delay
    pub exit_after: Option<Duration>,
}

/// Runs a self-update; abstracted so directive handling is testable
#[async_trait]
pub trait SelfUpdate: Send + Sync {
    async fn update(
        &self,
        target: &str,
        repository: &str,
        api_base: &str,
    ) -> Result<UpdateOutcome, UpdateError>;

    /// True when a service manager supervises this process
    fn is_service_mode(&self) -> bool;
}

/// Self-update from published releases
pub struct ReleaseSelfUpdate {
    settings: UpdateSettings,
    version: String,
    restart_args: Vec<String>,
}

impl ReleaseSelfUpdate {
    /// `restart_args` are passed to the new binary when the helper relaunches it
    pub fn new(settings: UpdateSettings, version: impl Into<String>, restart_args: Vec<String>) -> Self {
        Self {
            settings,
            version: version.into(),
            restart_args,
        }
    }
}

#[async_trait]
impl SelfUpdate for ReleaseSelfUpdate {
    async fn update(
        &self,
        target: &str,
        repository: &str,
        api_base: &str,
    ) -> Result<UpdateOutcome, UpdateError> {
        let mut settings = self.settings.clone();
        if !repository.trim().is_empty() {
            settings.repository = repository.trim().to_string();
        }
        if !api_base.trim().is_empty() {
            settings.api_base = api_base.trim().to_string();
        }
        Updater::new(settings, self.version.clone())?
            .update_to(target, self.restart_args.clone())
            .await
    }

    fn is_service_mode(&self) -> bool {
        ciwi_update::service::detect(&self.settings).is_service_mode()
    }
}

/// Service trait for applying control directives
#[async_trait]
pub trait ControlService: Send + Sync {
    async fn apply(&self, control: AgentControl) -> ControlReport;
}

/// Standard implementation of ControlService
pub struct StandardControlService {
    config: AgentConfig,
    updater: Arc<dyn SelfUpdate>,
}

impl StandardControlService {
    pub fn new(config: AgentConfig, updater: Arc<dyn SelfUpdate>) -> Self {
        Self { config, updater }
    }

    async fn update(&self, target: &str, repository: &str, api_base: &str) -> ControlReport {
        info!(target = %target, "Applying requested update");
        match self.updater.update(target, repository, api_base).await {
            Ok(UpdateOutcome::HelperStarted { helper, exit_after }) => {
                info!(helper = %helper.display(), "Update helper started, exiting");
                ControlReport {
                    exit_after: Some(exit_after),
                    ..Default::default()
                }
            }
            Ok(UpdateOutcome::Staged { manifest }) => {
                info!(manifest = %manifest.display(), "Update staged for the service manager");
                ControlReport::default()
            }
            Err(UpdateError::AlreadyCurrent(version)) => {
                info!(version = %version, "Update target already running");
                ControlReport::default()
            }
            Err(e) => {
                warn!(target = %target, "Update failed: {}", e);
                ControlReport {
                    update_failure: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    fn restart(&self) -> ControlReport {
        if !self.updater.is_service_mode() {
            warn!("Restart requested but no service manager would start the agent again");
            return ControlReport {
                restart_status: Some(
                    "restart refused: agent is not running under a service manager".to_string(),
                ),
                ..Default::default()
            };
        }
        info!("Restart requested, exiting for the service manager");
        ControlReport {
            restart_status: Some("restarting".to_string()),
            exit_after: Some(RESTART_DELAY),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ControlService for StandardControlService {
    async fn apply(&self, control: AgentControl) -> ControlReport {
        match control {
            AgentControl::Update {
                target,
                repository,
                api_base,
            } => self.update(&target, &repository, &api_base).await,
            AgentControl::Restart => self.restart(),
            AgentControl::WipeCache => {
                let removed = wipe_dir(self.config.cache_dir()).await;
                info!(removed, "Wiped agent cache");
                ControlReport::default()
            }
            AgentControl::WipeHistory => {
                let removed = wipe_dir(self.config.jobs_dir()).await;
                info!(removed, "Wiped job workspaces");
                ControlReport::default()
            }
        }
    }
}

/// Removes every entry below `dir`, keeping `dir` itself
async fn wipe_dir(dir: PathBuf) -> usize {
    tokio::task::spawn_blocking(move || wipe_dir_blocking(&dir))
        .await
        .unwrap_or_else(|e| {
            warn!("Wipe task failed: {}", e);
            0
        })
}

fn wipe_dir_blocking(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let result = match entry.file_type() {
            Ok(t) if t.is_dir() => std::fs::remove_dir_all(&path),
            _ => std::fs::remove_file(&path),
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "Failed to remove: {}", e),
        }
    }
    removed
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSelfUpdate;
    use super::*;

    fn service(dir: &Path, updater: FakeSelfUpdate) -> StandardControlService {
        let mut config = AgentConfig::new("agent-1".to_string(), "http://127.0.0.1:1".to_string());
        config.workdir = dir.to_path_buf();
        StandardControlService::new(config, Arc::new(updater))
    }

    fn update(target: &str) -> AgentControl {
        AgentControl::Update {
            target: target.to_string(),
            repository: "owner/repo".to_string(),
            api_base: String::new(),
        }
    }

    #[tokio::test]
    async fn test_update_helper_requests_exit() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSelfUpdate::new(
            true,
            Ok(UpdateOutcome::HelperStarted {
                helper: PathBuf::from("/tmp/ciwi-helper"),
                exit_after: Duration::from_millis(250),
            }),
        );
        let svc = service(dir.path(), fake);

        let report = svc.apply(update("v2.0.0")).await;
        assert_eq!(report.exit_after, Some(Duration::from_millis(250)));
        assert_eq!(report.update_failure, None);
    }

    #[tokio::test]
    async fn test_update_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSelfUpdate::new(
            false,
            Err(UpdateError::Preflight("not running under a service manager (unmanaged)".into())),
        );
        let svc = service(dir.path(), fake);

        let report = svc.apply(update("v2.0.0")).await;
        assert!(report.exit_after.is_none());
        assert!(report.update_failure.unwrap().contains("preflight failed"));
    }

    #[tokio::test]
    async fn test_already_current_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSelfUpdate::new(true, Err(UpdateError::AlreadyCurrent("v2.0.0".into())));
        let report = service(dir.path(), fake).apply(update("v2.0.0")).await;
        assert_eq!(report, ControlReport::default());
    }

    #[tokio::test]
    async fn test_restart_needs_service_mode() {
        let dir = tempfile::tempdir().unwrap();
        let unmanaged = service(dir.path(), FakeSelfUpdate::new(false, Ok(staged())));
        let report = unmanaged.apply(AgentControl::Restart).await;
        assert!(report.exit_after.is_none());
        assert!(report.restart_status.unwrap().starts_with("restart refused"));

        let managed = service(dir.path(), FakeSelfUpdate::new(true, Ok(staged())));
        let report = managed.apply(AgentControl::Restart).await;
        assert_eq!(report.exit_after, Some(RESTART_DELAY));
        assert_eq!(report.restart_status.as_deref(), Some("restarting"));
    }

    #[tokio::test]
    async fn test_wipes_clear_directories() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), FakeSelfUpdate::new(true, Ok(staged())));
        let cache = dir.path().join("cache/go/key");
        let jobs = dir.path().join("jobs/adhoc-1");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&jobs).unwrap();
        std::fs::write(dir.path().join("jobs/stray.txt"), "x").unwrap();

        svc.apply(AgentControl::WipeCache).await;
        assert!(dir.path().join("cache").exists());
        assert!(!cache.exists());
        assert!(jobs.exists());

        svc.apply(AgentControl::WipeHistory).await;
        assert_eq!(std::fs::read_dir(dir.path().join("jobs")).unwrap().count(), 0);
    }

    fn staged() -> UpdateOutcome {
        UpdateOutcome::Staged {
            manifest: PathBuf::from("/tmp/pending.json"),
        }
    }
}
