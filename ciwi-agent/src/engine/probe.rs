//! Runtime tool probing
//!
//! Runs each required tool with its version flag, extracts the version and
//! checks it against the job's constraints.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use ciwi_core::capability::tool_version_satisfies;
use ciwi_core::domain::metadata::{
    CONTAINER_TOOL_REQUIREMENT_PREFIX, CONTAINER_TOOL_RUNTIME_PREFIX, HOST_TOOL_RUNTIME_PREFIX,
    TOOL_REQUIREMENT_PREFIX,
};
use ciwi_core::version::extract_version;
use tracing::debug;

use super::container::RuntimeContainer;
use super::process::capture_output;
use super::shell::Shell;

const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Arguments that make `tool` print its version
pub fn version_args(tool: &str) -> &'static [&'static str] {
    match tool {
        "go" => &["version"],
        "java" | "javac" => &["-version"],
        "msbuild" => &["-version"],
        "xcodebuild" => &["-version"],
        "dotnet" => &["--version"],
        "ccache" => &["--version"],
        _ => &["--version"],
    }
}

/// Tools named by `requires.tool.*` and `requires.container.tool.*`
pub fn required_tools(required: &HashMap<String, String>) -> (Vec<String>, Vec<String>) {
    let mut host = Vec::new();
    let mut container = Vec::new();
    for key in required.keys() {
        if let Some(tool) = key.strip_prefix(CONTAINER_TOOL_REQUIREMENT_PREFIX) {
            container.push(tool.to_string());
        } else if let Some(tool) = key.strip_prefix(TOOL_REQUIREMENT_PREFIX) {
            host.push(tool.to_string());
        }
    }
    host.sort();
    container.sort();
    (host, container)
}

fn probe_script(shell: Shell, tool: &str) -> String {
    let line = std::iter::once(tool)
        .chain(version_args(tool).iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    match shell {
        // Some tools print their version on stderr
        Shell::Posix => format!("{line} 2>&1"),
        _ => line,
    }
}

/// Probes host tools under `shell`; missing tools are left out
pub async fn probe_host_tools(
    shell: Shell,
    tools: &[String],
    env: &HashMap<String, String>,
    cwd: &Path,
) -> HashMap<String, String> {
    let mut found = HashMap::new();
    for tool in tools {
        let spec = match shell.host_command(&probe_script(shell, tool), cwd).await {
            Ok(spec) => spec.cwd(cwd).envs(env),
            Err(e) => {
                debug!(tool = %tool, "Probe setup failed: {:#}", e);
                continue;
            }
        };
        if let Some(version) = run_probe(&spec).await {
            found.insert(format!("{HOST_TOOL_RUNTIME_PREFIX}{tool}"), version);
        }
    }
    found
}

/// Probes tools inside the runtime container
pub async fn probe_container_tools(
    container: &RuntimeContainer,
    tools: &[String],
) -> HashMap<String, String> {
    let mut found = HashMap::new();
    for tool in tools {
        let spec = container.exec_command(
            Shell::Posix,
            &probe_script(Shell::Posix, tool),
            &HashMap::new(),
        );
        if let Some(version) = run_probe(&spec).await {
            found.insert(format!("{CONTAINER_TOOL_RUNTIME_PREFIX}{tool}"), version);
        }
    }
    found
}

async fn run_probe(spec: &super::process::ProcessSpec) -> Option<String> {
    match capture_output(spec, PROBE_TIMEOUT).await {
        Ok((outcome, text)) if outcome.success() => extract_version(&text),
        Ok((outcome, _)) => {
            debug!(command = %spec.display(), ?outcome, "Probe failed");
            None
        }
        Err(e) => {
            debug!(command = %spec.display(), "Probe could not run: {:#}", e);
            None
        }
    }
}

/// Checks tool requirements against probed runtime capabilities
///
/// Returns one human readable line per unmet requirement.
pub fn unmet_runtime_requirements(
    required: &HashMap<String, String>,
    runtime: &HashMap<String, String>,
) -> Vec<String> {
    let mut unmet: Vec<String> = required
        .iter()
        .filter_map(|(key, constraint)| {
            let (tool, runtime_key, place) =
                if let Some(tool) = key.strip_prefix(CONTAINER_TOOL_REQUIREMENT_PREFIX) {
                    (tool, format!("{CONTAINER_TOOL_RUNTIME_PREFIX}{tool}"), "container")
                } else if let Some(tool) = key.strip_prefix(TOOL_REQUIREMENT_PREFIX) {
                    (tool, format!("{HOST_TOOL_RUNTIME_PREFIX}{tool}"), "host")
                } else {
                    return None;
                };

            match runtime.get(&runtime_key) {
                None => Some(format!("{place} tool {tool} not found")),
                Some(have) if !tool_version_satisfies(have, constraint) => Some(format!(
                    "{place} tool {tool} {have} does not satisfy {}",
                    constraint.trim()
                )),
                Some(_) => None,
            }
        })
        .collect();
    unmet.sort();
    unmet
}
