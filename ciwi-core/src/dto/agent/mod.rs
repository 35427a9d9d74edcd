//! Agent DTOs: heartbeat and lease

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::AgentControl;
use crate::domain::job::JobExecution;

/// Periodic heartbeat sent by every agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub capabilities: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_failure: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub restart_status: String,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

/// Heartbeat reply, carrying at most one control directive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    pub update_requested: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_target: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_repository: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub update_api_base: String,
    pub restart_requested: bool,
    pub cache_wipe_requested: bool,
    pub job_history_wipe_requested: bool,
}

impl HeartbeatResponse {
    /// Accepted response delivering `control`, if any
    pub fn with_control(control: Option<AgentControl>) -> Self {
        let mut response = Self {
            accepted: true,
            ..Default::default()
        };
        match control {
            Some(AgentControl::Update {
                target,
                repository,
                api_base,
            }) => {
                response.update_requested = true;
                response.update_target = target;
                response.update_repository = repository;
                response.update_api_base = api_base;
            }
            Some(AgentControl::Restart) => response.restart_requested = true,
            Some(AgentControl::WipeCache) => response.cache_wipe_requested = true,
            Some(AgentControl::WipeHistory) => response.job_history_wipe_requested = true,
            None => {}
        }
        response
    }

    /// Directives carried by this response, in delivery order
    pub fn controls(&self) -> Vec<AgentControl> {
        let mut controls = Vec::new();
        if self.update_requested && !self.update_target.is_empty() {
            controls.push(AgentControl::Update {
                target: self.update_target.clone(),
                repository: self.update_repository.clone(),
                api_base: self.update_api_base.clone(),
            });
        }
        if self.restart_requested {
            controls.push(AgentControl::Restart);
        }
        if self.cache_wipe_requested {
            controls.push(AgentControl::WipeCache);
        }
        if self.job_history_wipe_requested {
            controls.push(AgentControl::WipeHistory);
        }
        controls
    }
}

/// Lease request: "give me one job I can run"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseRequest {
    pub agent_id: String,
    pub capabilities: HashMap<String, String>,
}

/// Lease reply with at most one job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseResponse {
    pub assigned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_execution: Option<JobExecution>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Request body for queueing an update on an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentUpdateRequest {
    pub target: String,
    pub repository: String,
    pub api_base: String,
}
