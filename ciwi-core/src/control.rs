//! Agent control directives
//!
//! Directives travel from server to agent in heartbeat responses. Both the
//! server (per agent, until delivered) and the agent (while a job runs)
//! hold them in a [`ControlQueue`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A directive for an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentControl {
    Update {
        target: String,
        #[serde(default)]
        repository: String,
        #[serde(default)]
        api_base: String,
    },
    Restart,
    WipeCache,
    WipeHistory,
}

/// Directives a queue holds before the oldest is dropped
pub const CONTROL_QUEUE_CAPACITY: usize = 16;

/// Bounded FIFO of directives in which only the latest update target survives
///
/// Pushing an update while another update is queued replaces the queued
/// target in place, keeping its position. Pushing onto a full queue drops
/// the oldest directive.
#[derive(Debug, Clone)]
pub struct ControlQueue {
    items: VecDeque<AgentControl>,
    capacity: usize,
}

impl Default for ControlQueue {
    fn default() -> Self {
        Self::with_capacity(CONTROL_QUEUE_CAPACITY)
    }
}

impl ControlQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue holding at most `capacity` directives (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue `control`; returns the directive dropped to make room, if any
    pub fn push(&mut self, control: AgentControl) -> Option<AgentControl> {
        if let AgentControl::Update { .. } = control
            && let Some(existing) = self
                .items
                .iter_mut()
                .find(|c| matches!(c, AgentControl::Update { .. }))
        {
            *existing = control;
            return None;
        }

        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(control);
        dropped
    }

    pub fn pop(&mut self) -> Option<AgentControl> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&AgentControl> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pending update target, if any
    pub fn update_target(&self) -> Option<&str> {
        self.items.iter().find_map(|c| match c {
            AgentControl::Update { target, .. } => Some(target.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(target: &str) -> AgentControl {
        AgentControl::Update {
            target: target.to_string(),
            repository: String::new(),
            api_base: String::new(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = ControlQueue::new();
        queue.push(AgentControl::WipeCache);
        queue.push(AgentControl::Restart);
        assert_eq!(queue.pop(), Some(AgentControl::WipeCache));
        assert_eq!(queue.pop(), Some(AgentControl::Restart));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_latest_update_target_replaces_in_place() {
        let mut queue = ControlQueue::new();
        queue.push(AgentControl::Restart);
        queue.push(update("v1.1.0"));
        queue.push(AgentControl::WipeHistory);
        queue.push(update("v1.2.0"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.update_target(), Some("v1.2.0"));
        assert_eq!(queue.pop(), Some(AgentControl::Restart));
        assert_eq!(queue.pop(), Some(update("v1.2.0")));
        assert_eq!(queue.pop(), Some(AgentControl::WipeHistory));
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut queue = ControlQueue::with_capacity(2);
        assert_eq!(queue.push(AgentControl::WipeCache), None);
        assert_eq!(queue.push(AgentControl::Restart), None);
        assert_eq!(queue.push(AgentControl::WipeHistory), Some(AgentControl::WipeCache));
        assert_eq!(queue.len(), 2);

        // Replacing the queued update needs no room
        let mut queue = ControlQueue::with_capacity(2);
        queue.push(update("v1.0.0"));
        queue.push(AgentControl::Restart);
        assert_eq!(queue.push(update("v1.1.0")), None);
        assert_eq!(queue.pop(), Some(update("v1.1.0")));
    }

    #[test]
    fn test_default_capacity() {
        let mut queue = ControlQueue::new();
        for _ in 0..CONTROL_QUEUE_CAPACITY {
            assert_eq!(queue.push(AgentControl::WipeCache), None);
        }
        assert_eq!(queue.push(AgentControl::Restart), Some(AgentControl::WipeCache));
        assert_eq!(queue.len(), CONTROL_QUEUE_CAPACITY);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(update("v2.0.0")).unwrap();
        assert_eq!(json["kind"], "update");
        assert_eq!(json["target"], "v2.0.0");
        let parsed: AgentControl = serde_json::from_str(r#"{"kind":"wipe_cache"}"#).unwrap();
        assert_eq!(parsed, AgentControl::WipeCache);
    }
}
