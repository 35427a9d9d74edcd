//! Agent domain model
//!
//! Agents are known to the server only through heartbeat snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest heartbeat snapshot of an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub capabilities: HashMap<String, String>,
    pub last_seen_utc: DateTime<Utc>,

    /// Last self-update failure reported by the agent
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_failure: String,

    /// Last restart outcome reported by the agent
    #[serde(skip_serializing_if = "String::is_empty")]
    pub restart_status: String,

    /// Update target the server currently asks this agent to install
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_target: String,

    /// Number of control directives waiting for the next heartbeat
    pub pending_controls: usize,
}

impl AgentInfo {
    /// Capabilities used for scheduling decisions
    ///
    /// `os` and `arch` from the snapshot fill in when the capability map
    /// does not carry them itself.
    pub fn effective_capabilities(&self) -> HashMap<String, String> {
        let mut caps = self.capabilities.clone();
        if !self.os.is_empty() {
            caps.entry("os".to_string()).or_insert_with(|| self.os.clone());
        }
        if !self.arch.is_empty() {
            caps.entry("arch".to_string())
                .or_insert_with(|| self.arch.clone());
        }
        caps
    }
}
