//! Capabilities service
//!
//! Discovers the capabilities this agent advertises in heartbeats and lease
//! requests: platform, shells, run mode, and versions of well-known tools
//! found on the host. The server matches jobs against them.

use std::collections::HashMap;

use async_trait::async_trait;
use ciwi_core::domain::metadata::{AGENT_TOOL_PREFIX, HOST_TOOL_RUNTIME_PREFIX};
use ciwi_update::asset::{normalize_arch, normalize_os};
use tracing::{debug, info};

use crate::engine::probe;
use crate::engine::shell::{Shell, host_shells};

/// Tools probed at startup
pub const KNOWN_TOOLS: &[&str] = &[
    "git", "go", "gcc", "clang", "cmake", "make", "ninja", "docker", "python3", "node", "java",
    "dotnet", "cargo", "rustc", "msbuild", "xcodebuild", "ccache", "gh",
];

/// Service trait for capability discovery
#[async_trait]
pub trait CapabilitiesService: Send + Sync {
    /// Discovers all capabilities available on this agent
    async fn discover(&self) -> HashMap<String, String>;
}

/// Standard implementation of CapabilitiesService
pub struct StandardCapabilitiesService {
    run_mode: &'static str,
    tools: Vec<String>,
}

impl StandardCapabilitiesService {
    /// Creates a capabilities service probing [`KNOWN_TOOLS`]
    ///
    /// `service_mode` is true when a service manager supervises the agent.
    pub fn new(service_mode: bool) -> Self {
        Self {
            run_mode: if service_mode { "service" } else { "manual" },
            tools: KNOWN_TOOLS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Restricts probing to `tools`
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// Capabilities that need no probing
pub fn platform_capabilities(run_mode: &str) -> HashMap<String, String> {
    let shells = host_shells()
        .iter()
        .map(Shell::as_str)
        .collect::<Vec<_>>()
        .join(",");

    HashMap::from([
        ("os".to_string(), normalize_os(std::env::consts::OS).to_string()),
        ("arch".to_string(), normalize_arch(std::env::consts::ARCH).to_string()),
        ("executor".to_string(), "script".to_string()),
        ("shells".to_string(), shells),
        ("run_mode".to_string(), run_mode.to_string()),
    ])
}

#[async_trait]
impl CapabilitiesService for StandardCapabilitiesService {
    async fn discover(&self) -> HashMap<String, String> {
        info!("Discovering agent capabilities");

        let mut capabilities = platform_capabilities(self.run_mode);
        let probed = probe::probe_host_tools(
            Shell::host_default(),
            &self.tools,
            &HashMap::new(),
            &std::env::temp_dir(),
        )
        .await;

        for (key, version) in probed {
            let Some(tool) = key.strip_prefix(HOST_TOOL_RUNTIME_PREFIX) else {
                continue;
            };
            debug!(tool = %tool, version = %version, "Found tool");
            capabilities.insert(format!("{AGENT_TOOL_PREFIX}{tool}"), version);
        }

        info!("Discovered {} capabilities", capabilities.len());
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_capabilities() {
        let caps = platform_capabilities("manual");
        assert_eq!(caps["executor"], "script");
        assert_eq!(caps["run_mode"], "manual");
        assert!(!caps["os"].is_empty());
        assert_ne!(caps["arch"], "x86_64");
        assert_ne!(caps["os"], "macos");
        if cfg!(unix) {
            assert!(caps["shells"].split(',').any(|s| s == "posix"));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_reports_found_tools_only() {
        let service = StandardCapabilitiesService::new(true)
            .with_tools(vec!["sh".to_string(), "ciwi-no-such-tool".to_string()]);
        let caps = service.discover().await;

        assert_eq!(caps["run_mode"], "service");
        assert!(!caps.contains_key("tool.ciwi-no-such-tool"));
        assert!(caps.keys().all(|k| !k.starts_with(HOST_TOOL_RUNTIME_PREFIX)));
    }
}
