//! Update helper
//!
//! The generic update path: a copy of the running binary is started in
//! `update-helper` mode, waits for its parent to exit, swaps the new binary
//! into place and relaunches it with the original arguments.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::{Result, UpdateError};

/// Subcommand the helper copy is started with
pub const HELPER_SUBCOMMAND: &str = "update-helper";

const PARENT_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Arguments of a helper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperArgs {
    /// Binary to replace
    pub target: PathBuf,
    /// Verified new binary
    pub new: PathBuf,
    /// Process to wait for
    pub pid: u32,
    /// Arguments the target is relaunched with
    pub args: Vec<String>,
}

impl HelperArgs {
    /// Command line for the helper process
    pub fn to_argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            HELPER_SUBCOMMAND.into(),
            "--target".into(),
            self.target.clone().into(),
            "--new".into(),
            self.new.clone().into(),
            "--pid".into(),
            self.pid.to_string().into(),
        ];
        for arg in &self.args {
            argv.push("--arg".into());
            argv.push(arg.into());
        }
        argv
    }
}

/// Path of the timestamped helper copy next to `current`
pub fn helper_path(current: &Path) -> PathBuf {
    let stem = current
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ciwi".to_string());
    let ext = current
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = format!("{stem}-update-helper-{}{ext}", Utc::now().format("%Y%m%d%H%M%S"));
    current.with_file_name(name)
}

/// `<target>.bak`
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(".bak");
    target.with_file_name(name)
}

/// Copy the running binary and start it in helper mode
pub fn spawn_helper(current_exe: &Path, args: &HelperArgs) -> Result<PathBuf> {
    let helper = helper_path(current_exe);
    std::fs::copy(current_exe, &helper)?;
    set_executable(&helper)?;

    Command::new(&helper)
        .args(args.to_argv())
        .stdin(Stdio::null())
        .spawn()?;

    tracing::info!(helper = %helper.display(), pid = args.pid, "Update helper started");
    Ok(helper)
}

/// Helper-mode entry point
///
/// On unix this only returns on failure: a successful relaunch replaces the
/// helper process.
pub fn run_helper(args: &HelperArgs) -> Result<()> {
    wait_for_exit(args.pid, PARENT_EXIT_TIMEOUT);

    let backup = swap_binaries(&args.target, &args.new)?;
    tracing::info!(binary = %args.target.display(), "Binary replaced, relaunching");

    if let Err(e) = relaunch(&args.target, &args.args) {
        tracing::error!("Relaunch failed, rolling back: {}", e);
        rollback(&args.target, &backup)?;
        relaunch(&args.target, &args.args)?;
        return Err(UpdateError::Io(e));
    }
    Ok(())
}

/// Move `new` over `target`, keeping the old binary as `<target>.bak`
///
/// The new binary is first copied next to the target so the final step is
/// a same-filesystem rename.
pub fn swap_binaries(target: &Path, new: &Path) -> Result<PathBuf> {
    let backup = backup_path(target);
    let mut incoming = target.as_os_str().to_owned();
    incoming.push(".new");
    let incoming = PathBuf::from(incoming);

    std::fs::copy(new, &incoming)?;
    set_executable(&incoming)?;

    match std::fs::remove_file(&backup) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    let had_target = target.exists();
    if had_target {
        std::fs::rename(target, &backup)?;
    }

    if let Err(e) = std::fs::rename(&incoming, target) {
        if had_target {
            let _ = std::fs::rename(&backup, target);
        }
        let _ = std::fs::remove_file(&incoming);
        return Err(e.into());
    }

    let _ = std::fs::remove_file(new);
    Ok(backup)
}

/// Put the backup back in place
pub fn rollback(target: &Path, backup: &Path) -> Result<()> {
    if !backup.exists() {
        return Ok(());
    }
    match std::fs::remove_file(target) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    std::fs::rename(backup, target)?;
    Ok(())
}

fn wait_for_exit(pid: u32, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            tracing::warn!(pid, "Parent still running, swapping anyway");
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; give the parent time to exit.
    std::thread::sleep(Duration::from_secs(2));
    false
}

#[cfg(unix)]
fn relaunch(target: &Path, args: &[String]) -> std::io::Result<()> {
    use std::os::unix::process::CommandExt;

    // `exec` only returns on error.
    Err(Command::new(target).args(args).exec())
}

#[cfg(not(unix))]
fn relaunch(target: &Path, args: &[String]) -> std::io::Result<()> {
    Command::new(target).args(args).spawn().map(|_| ())
}

#[cfg(unix)]
pub(crate) fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
