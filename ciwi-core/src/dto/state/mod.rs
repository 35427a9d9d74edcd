//! WatchState stream snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentInfo;
use crate::domain::project::ProjectSummary;

/// One periodic snapshot on the observational state stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub stream_id: String,
    pub seq: u64,
    pub sent_utc: DateTime<Utc>,
    pub server_info: ServerInfo,
    pub projects: Vec<ProjectSummary>,
    pub agents: Vec<AgentInfo>,
    pub jobs_summary: JobsSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub update_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSummary {
    pub queued_count: u64,
    pub history_count: u64,
    pub queued_group_count: u64,
    pub history_group_count: u64,
}

/// Request to update the server binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerUpdateRequest {
    pub target: String,
}

/// Recorded progress of a server self-update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateProgress {
    pub status: String,
    pub target: String,
    pub message: String,
}
