//! Agent Service
//!
//! In-memory registry of agent heartbeat snapshots and the control
//! directives waiting to be delivered to each agent.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use ciwi_core::control::{AgentControl, ControlQueue};
use ciwi_core::domain::agent::AgentInfo;
use ciwi_core::dto::agent::{HeartbeatRequest, HeartbeatResponse};
use thiserror::Error;

/// Service error type
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Default)]
struct AgentEntry {
    info: AgentInfo,
    controls: ControlQueue,
}

impl AgentEntry {
    /// No heartbeat has been recorded into this entry yet
    fn is_new(&self) -> bool {
        self.info.agent_id.is_empty()
    }
}

/// Latest heartbeat of every agent plus its pending directives
///
/// Nothing here is persisted: the latest heartbeat is authoritative for
/// scheduling and a restarted server simply waits for the next round.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat and hand back at most one queued directive
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse, AgentError> {
        let agent_id = req.agent_id.trim().to_string();
        if agent_id.is_empty() {
            return Err(AgentError::Validation("agent_id is required".to_string()));
        }

        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let entry = agents.entry(agent_id.clone()).or_default();
        if entry.is_new() {
            tracing::info!(agent_id = %agent_id, hostname = %req.hostname, "Agent connected");
        }

        if !req.update_failure.is_empty() && req.update_failure != entry.info.update_failure {
            tracing::warn!(agent_id = %agent_id, "Agent reported update failure: {}", req.update_failure);
        }

        entry.info = AgentInfo {
            agent_id,
            hostname: req.hostname,
            os: req.os,
            arch: req.arch,
            version: req.version,
            capabilities: req.capabilities,
            last_seen_utc: req.timestamp_utc.unwrap_or_else(Utc::now),
            update_failure: req.update_failure,
            restart_status: req.restart_status,
            update_target: String::new(),
            pending_controls: 0,
        };

        let control = entry.controls.pop();
        if let Some(control) = &control {
            tracing::info!(agent_id = %entry.info.agent_id, ?control, "Delivering control directive");
        }
        refresh_control_view(entry);

        Ok(HeartbeatResponse::with_control(control))
    }

    /// Queue a directive for delivery on the agent's next heartbeat
    pub fn queue_control(&self, agent_id: &str, control: AgentControl) -> Result<(), AgentError> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let entry = agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;

        tracing::info!(agent_id = %agent_id, ?control, "Queued control directive");
        if let Some(dropped) = entry.controls.push(control) {
            tracing::warn!(
                agent_id = %agent_id,
                control = ?dropped,
                "Control queue full, dropped oldest directive"
            );
        }
        refresh_control_view(entry);
        Ok(())
    }

    /// Snapshot of one agent
    pub fn get(&self, agent_id: &str) -> Option<AgentInfo> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.get(agent_id).map(|e| e.info.clone())
    }

    /// Snapshots of every known agent, ordered by id
    pub fn list(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<AgentInfo> = agents.values().map(|e| e.info.clone()).collect();
        list.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        list
    }

    /// Capabilities used to match a lease request
    ///
    /// The heartbeat snapshot is the base; capabilities sent with the lease
    /// request override it key by key.
    pub fn scheduling_capabilities(
        &self,
        agent_id: &str,
        overlay: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut caps = self
            .get(agent_id)
            .map(|info| info.effective_capabilities())
            .unwrap_or_default();
        caps.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        caps
    }
}

fn refresh_control_view(entry: &mut AgentEntry) {
    entry.info.pending_controls = entry.controls.len();
    entry.info.update_target = entry
        .controls
        .update_target()
        .unwrap_or_default()
        .to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(agent_id: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            agent_id: agent_id.to_string(),
            hostname: "host".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            capabilities: HashMap::from([("tool.go".to_string(), "1.24.1".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_heartbeat_registers_agent() {
        let registry = AgentRegistry::new();
        let response = registry.heartbeat(heartbeat("agent-a")).unwrap();
        assert!(response.accepted);
        assert!(!response.update_requested);

        let agents = registry.list();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_id, "agent-a");
    }

    #[test]
    fn test_entry_is_new_until_first_heartbeat() {
        assert!(AgentEntry::default().is_new());

        let registry = AgentRegistry::new();
        registry.heartbeat(heartbeat("agent-a")).unwrap();
        let agents = registry.agents.read().unwrap();
        assert!(!agents["agent-a"].is_new());
    }

    #[test]
    fn test_heartbeat_requires_agent_id() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.heartbeat(heartbeat("  ")),
            Err(AgentError::Validation(_))
        ));
    }

    #[test]
    fn test_controls_delivered_one_per_heartbeat_in_order() {
        let registry = AgentRegistry::new();
        registry.heartbeat(heartbeat("agent-a")).unwrap();

        let update = |target: &str| AgentControl::Update {
            target: target.to_string(),
            repository: String::new(),
            api_base: String::new(),
        };
        registry.queue_control("agent-a", update("v1.0.0")).unwrap();
        registry.queue_control("agent-a", AgentControl::WipeCache).unwrap();
        registry.queue_control("agent-a", update("v1.1.0")).unwrap();
        assert_eq!(registry.get("agent-a").unwrap().update_target, "v1.1.0");
        assert_eq!(registry.get("agent-a").unwrap().pending_controls, 2);

        let first = registry.heartbeat(heartbeat("agent-a")).unwrap();
        assert!(first.update_requested);
        assert_eq!(first.update_target, "v1.1.0");

        let second = registry.heartbeat(heartbeat("agent-a")).unwrap();
        assert!(second.cache_wipe_requested);

        let third = registry.heartbeat(heartbeat("agent-a")).unwrap();
        assert!(third.controls().is_empty());
    }

    #[test]
    fn test_queue_control_unknown_agent() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.queue_control("ghost", AgentControl::Restart),
            Err(AgentError::NotFound(_))
        ));
    }

    #[test]
    fn test_scheduling_capabilities_overlay() {
        let registry = AgentRegistry::new();
        registry.heartbeat(heartbeat("agent-a")).unwrap();

        let overlay = HashMap::from([("tool.go".to_string(), "1.25.0".to_string())]);
        let caps = registry.scheduling_capabilities("agent-a", &overlay);
        assert_eq!(caps["os"], "linux");
        assert_eq!(caps["tool.go"], "1.25.0");
    }
}
