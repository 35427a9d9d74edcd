//! Agent configuration
//!
//! Defines the server connection, identity, polling intervals and local
//! working directory of the agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
///
/// Intervals are configurable so tests and slow networks can tune them.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique identifier for this agent
    pub agent_id: String,

    /// Server base URL (e.g., "http://127.0.0.1:8112")
    pub server_url: String,

    /// Root for job workspaces and caches
    pub workdir: PathBuf,

    /// How often to send a heartbeat
    pub heartbeat_interval: Duration,

    /// How often to ask for a job while idle
    pub lease_interval: Duration,

    /// How often the control-plane watcher polls a running job
    pub watch_interval: Duration,

    /// How often live output is posted
    pub stream_interval: Duration,

    /// Emit shell tracing (`set -x` and friends) for non-secret jobs
    pub trace_shell: bool,

    /// Add `-v` to go builds
    pub go_build_verbose: bool,

    /// Extra `KEY=VALUE` environment merged over the host environment
    pub extra_env: HashMap<String, String>,
}

impl AgentConfig {
    /// Creates a new configuration with defaults
    pub fn new(agent_id: String, server_url: String) -> Self {
        Self {
            agent_id,
            server_url,
            workdir: PathBuf::from(".ciwi-agent/work"),
            heartbeat_interval: Duration::from_secs(10),
            lease_interval: Duration::from_secs(3),
            watch_interval: Duration::from_millis(500),
            stream_interval: Duration::from_millis(500),
            trace_shell: true,
            go_build_verbose: false,
            extra_env: HashMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised variables:
    /// - CIWI_SERVER_URL (default: http://127.0.0.1:8112)
    /// - CIWI_AGENT_ID (default: agent-<hostname>)
    /// - CIWI_AGENT_WORKDIR (default: .ciwi-agent/work)
    /// - CIWI_AGENT_TRACE_SHELL (default: on)
    /// - CIWI_AGENT_GO_BUILD_VERBOSE (default: off)
    /// - CIWI_AGENT_ENV_FILE (optional, KEY=VALUE lines)
    pub fn from_env() -> anyhow::Result<Self> {
        let server_url = env_string("CIWI_SERVER_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8112".to_string());
        let agent_id =
            env_string("CIWI_AGENT_ID").unwrap_or_else(|| format!("agent-{}", hostname()));

        let mut config = Self::new(agent_id, server_url);
        if let Some(workdir) = env_string("CIWI_AGENT_WORKDIR") {
            config.workdir = PathBuf::from(workdir);
        }
        if let Some(flag) = env_string("CIWI_AGENT_TRACE_SHELL") {
            config.trace_shell = parse_flag(&flag).unwrap_or(true);
        }
        if let Some(flag) = env_string("CIWI_AGENT_GO_BUILD_VERBOSE") {
            config.go_build_verbose = parse_flag(&flag).unwrap_or(false);
        }
        if let Some(path) = env_string("CIWI_AGENT_ENV_FILE") {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read env file {path}: {e}"))?;
            config.extra_env = parse_env_file(&raw);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.trim().is_empty() {
            anyhow::bail!("agent_id cannot be empty");
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            anyhow::bail!("server_url must start with http:// or https://");
        }

        if self.workdir.as_os_str().is_empty() {
            anyhow::bail!("workdir cannot be empty");
        }

        if self.heartbeat_interval.is_zero() || self.lease_interval.is_zero() {
            anyhow::bail!("heartbeat and lease intervals must be greater than 0");
        }

        Ok(())
    }

    /// Directory holding per-job workspaces
    pub fn jobs_dir(&self) -> PathBuf {
        self.workdir.join("jobs")
    }

    /// Directory holding named caches
    pub fn cache_dir(&self) -> PathBuf {
        self.workdir.join("cache")
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(
            format!("agent-{}", hostname()),
            "http://127.0.0.1:8112".to_string(),
        )
    }
}

/// Host name, or "unknown"
pub fn hostname() -> String {
    #[cfg(unix)]
    if let Ok(name) = nix::unistd::gethostname() {
        let name = name.to_string_lossy().trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }

    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|k| env_string(k))
        .unwrap_or_else(|| "unknown".to_string())
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped
pub fn parse_env_file(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.lease_interval, Duration::from_secs(3));
        assert_eq!(config.watch_interval, Duration::from_millis(500));
        assert!(config.agent_id.starts_with("agent-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();

        config.agent_id = " ".to_string();
        assert!(config.validate().is_err());

        config.agent_id = "a1".to_string();
        config.server_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.server_url = "https://ci.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_env_file() {
        let env = parse_env_file("# comment\nPATH=/opt/bin\n\n GOFLAGS = -mod=mod \nbroken\n=x\n");
        assert_eq!(env.len(), 2);
        assert_eq!(env["PATH"], "/opt/bin");
        assert_eq!(env["GOFLAGS"], "-mod=mod");
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
