//! Script shells
//!
//! Turns a job script into a command line for the resolved shell, with the
//! tracing prefix applied when the job allows it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use super::process::ProcessSpec;

/// Shell a script runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Posix,
    Cmd,
    PowerShell,
}

impl Shell {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "posix" | "sh" | "bash" => Some(Shell::Posix),
            "cmd" => Some(Shell::Cmd),
            "powershell" | "pwsh" => Some(Shell::PowerShell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shell::Posix => "posix",
            Shell::Cmd => "cmd",
            Shell::PowerShell => "powershell",
        }
    }

    /// Shell used when a job does not ask for one
    pub fn host_default() -> Self {
        if cfg!(windows) { Shell::Cmd } else { Shell::Posix }
    }

    /// Shell named by the job's `shell` requirement, or the host default
    pub fn resolve(required: &HashMap<String, String>) -> Result<Self> {
        match required.get("shell").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            Some(name) => {
                Shell::parse(name).with_context(|| format!("unsupported shell {name:?}"))
            }
            None => Ok(Shell::host_default()),
        }
    }

    /// Lines put in front of every script
    ///
    /// Posix scripts always stop on the first failing command; tracing
    /// echoes each command as it runs.
    pub fn prelude(&self, trace: bool) -> &'static str {
        match (self, trace) {
            (Shell::Posix, true) => "set -e\nset -x\n",
            (Shell::Posix, false) => "set -e\n",
            (Shell::Cmd, true) => "@echo on\r\n",
            (Shell::Cmd, false) => "@echo off\r\n",
            (Shell::PowerShell, true) => "$ErrorActionPreference='Stop'\nSet-PSDebug -Trace 1\n",
            (Shell::PowerShell, false) => "$ErrorActionPreference='Stop'\n",
        }
    }

    /// Full script text
    pub fn build_script(&self, script: &str, trace: bool) -> String {
        let body = match self {
            Shell::Cmd => script.replace("\r\n", "\n").replace('\n', "\r\n"),
            _ => script.to_string(),
        };
        format!("{}{}", self.prelude(trace), body)
    }

    /// Command that runs `script` on the host
    ///
    /// `cmd` cannot take multi-line scripts on its command line, so its
    /// scripts are written to a file under `script_dir` first.
    pub async fn host_command(&self, script: &str, script_dir: &Path) -> Result<ProcessSpec> {
        Ok(match self {
            Shell::Posix => ProcessSpec::new("sh").arg("-c").arg(script),
            Shell::PowerShell => ProcessSpec::new(powershell_program()).args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                script,
            ]),
            Shell::Cmd => {
                let path = script_dir.join(".ciwi-script.cmd");
                tokio::fs::write(&path, script)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                ProcessSpec::new("cmd")
                    .args(["/d", "/c"])
                    .arg(path.to_string_lossy())
            }
        })
    }

    /// Arguments that run `script` inside a container
    pub fn container_args(&self, script: &str) -> Vec<String> {
        match self {
            Shell::PowerShell => vec![
                "pwsh".to_string(),
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                script.to_string(),
            ],
            _ => vec!["sh".to_string(), "-lc".to_string(), script.to_string()],
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn powershell_program() -> &'static str {
    if cfg!(windows) { "powershell" } else { "pwsh" }
}

/// Shells usable on this host, as advertised in the `shells` capability
pub fn host_shells() -> Vec<Shell> {
    if cfg!(windows) {
        vec![Shell::Cmd, Shell::PowerShell]
    } else {
        vec![Shell::Posix]
    }
}
