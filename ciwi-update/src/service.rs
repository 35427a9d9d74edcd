//! Service-manager integration
//!
//! How the running process is supervised decides how an update is applied:
//! systemd and launchd units stage the update for a privileged updater unit,
//! anything else goes through the update helper.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, UpdateError};
use crate::manifest::StagedManifest;
use crate::settings::UpdateSettings;

/// systemd unit that consumes staged manifests
pub const SYSTEMD_UPDATER_UNIT: &str = "ciwi-updater.service";
/// launchd label that consumes staged manifests
pub const LAUNCHD_UPDATER_LABEL: &str = "io.github.izzyreal.ciwi.updater";

/// Host service manager
pub trait ServiceManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when the process runs under this manager
    fn is_service_mode(&self) -> bool;

    /// True when updates go through a staged manifest instead of the helper
    fn supports_staging(&self) -> bool {
        false
    }

    /// Write the manifest where the updater unit will find it
    fn stage_update(&self, manifest: &StagedManifest, path: &Path) -> Result<()> {
        manifest.write_atomic(path)
    }

    /// Ask the manager to run the updater unit
    fn trigger_update(&self) -> Result<()> {
        Err(UpdateError::ServiceManager(format!(
            "{} cannot apply staged updates",
            self.name()
        )))
    }

    /// Restart the service after its binary was replaced
    fn restart(&self, label: &str) -> Result<()>;

    /// Post-swap fixups on the new binary
    fn prepare_binary(&self, _binary: &Path) -> Result<()> {
        Ok(())
    }
}

/// Pick the manager for the current process
pub fn detect(settings: &UpdateSettings) -> Box<dyn ServiceManager> {
    if cfg!(target_os = "linux") && std::env::var_os("INVOCATION_ID").is_some() {
        return Box::new(Systemd {
            systemctl: settings.systemctl_path.clone(),
        });
    }
    if cfg!(target_os = "macos") && launchd_label().is_some() {
        return Box::new(Launchd {
            launchctl: settings.launchctl_path.clone(),
            codesign: settings.codesign_path.clone(),
        });
    }
    Box::new(Unmanaged {
        service_mode: cfg!(windows) && std::env::var("CIWI_WINDOWS_SERVICE").as_deref() == Ok("1"),
    })
}

fn launchd_label() -> Option<String> {
    std::env::var("XPC_SERVICE_NAME")
        .ok()
        .filter(|l| !l.is_empty() && l != "0")
}

fn run(program: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        UpdateError::ServiceManager(format!("failed to run {}: {e}", program.display()))
    })?;
    if !output.status.success() {
        return Err(UpdateError::ServiceManager(format!(
            "{} {} failed: {}",
            program.display(),
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Linux systemd
#[derive(Debug, Clone)]
pub struct Systemd {
    pub systemctl: PathBuf,
}

impl ServiceManager for Systemd {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn is_service_mode(&self) -> bool {
        true
    }

    fn supports_staging(&self) -> bool {
        true
    }

    fn trigger_update(&self) -> Result<()> {
        run(&self.systemctl, &["start", "--no-block", SYSTEMD_UPDATER_UNIT])
    }

    fn restart(&self, label: &str) -> Result<()> {
        run(&self.systemctl, &["restart", label])
    }
}

/// macOS launchd
#[derive(Debug, Clone)]
pub struct Launchd {
    pub launchctl: PathBuf,
    pub codesign: PathBuf,
}

impl ServiceManager for Launchd {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn is_service_mode(&self) -> bool {
        true
    }

    fn supports_staging(&self) -> bool {
        true
    }

    fn trigger_update(&self) -> Result<()> {
        let target = format!("system/{LAUNCHD_UPDATER_LABEL}");
        run(&self.launchctl, &["kickstart", &target])
    }

    fn restart(&self, label: &str) -> Result<()> {
        let target = if label.contains('/') {
            label.to_string()
        } else {
            format!("system/{label}")
        };
        run(&self.launchctl, &["kickstart", "-k", &target])
    }

    fn prepare_binary(&self, binary: &Path) -> Result<()> {
        let path = binary.to_string_lossy();
        run(&self.codesign, &["--force", "--sign", "-", &path])
    }
}

/// No service manager: updates use the helper and restart themselves
#[derive(Debug, Clone, Default)]
pub struct Unmanaged {
    pub service_mode: bool,
}

impl ServiceManager for Unmanaged {
    fn name(&self) -> &'static str {
        "unmanaged"
    }

    fn is_service_mode(&self) -> bool {
        self.service_mode
    }

    fn restart(&self, label: &str) -> Result<()> {
        Err(UpdateError::ServiceManager(format!(
            "cannot restart {label} without a service manager"
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmanaged_cannot_stage() {
        let svc = Unmanaged::default();
        assert!(!svc.is_service_mode());
        assert!(!svc.supports_staging());
        assert!(matches!(svc.trigger_update(), Err(UpdateError::ServiceManager(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_systemd_reports_command_failure() {
        let svc = Systemd {
            systemctl: PathBuf::from("false"),
        };
        assert!(matches!(svc.restart("ciwi.service"), Err(UpdateError::ServiceManager(_))));

        let ok = Systemd {
            systemctl: PathBuf::from("true"),
        };
        ok.trigger_update().unwrap();
    }
}
