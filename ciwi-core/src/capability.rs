//! Capability matching
//!
//! Pure predicate deciding whether an agent may lease a job, plus the
//! explainer behind "why is this job not running?".

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::agent::AgentInfo;
use crate::domain::metadata::{
    AGENT_TOOL_PREFIX, CONTAINER_TOOL_REQUIREMENT_PREFIX, TOOL_REQUIREMENT_PREFIX,
};
use crate::version::Version;

/// Comparison operator of a tool constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
}

impl ConstraintOp {
    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            ConstraintOp::Ge => ord != Ordering::Less,
            ConstraintOp::Le => ord != Ordering::Greater,
            ConstraintOp::Gt => ord == Ordering::Greater,
            ConstraintOp::Lt => ord == Ordering::Less,
            ConstraintOp::Eq => ord == Ordering::Equal,
        }
    }
}

/// Splits a constraint into its operator and version; no operator means equality
pub fn split_constraint(constraint: &str) -> (ConstraintOp, &str) {
    let c = constraint.trim();
    for (prefix, op) in [
        (">=", ConstraintOp::Ge),
        ("<=", ConstraintOp::Le),
        ("==", ConstraintOp::Eq),
        (">", ConstraintOp::Gt),
        ("<", ConstraintOp::Lt),
        ("=", ConstraintOp::Eq),
    ] {
        if let Some(rest) = c.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    (ConstraintOp::Eq, c)
}

/// Whether an installed tool version satisfies a constraint
///
/// Empty and `*` constraints only require the tool to be present. When
/// either side is not semver, only exact string equality under `=`/`==`
/// is accepted.
pub fn tool_version_satisfies(have: &str, constraint: &str) -> bool {
    let have = have.trim();
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" {
        return !have.is_empty();
    }
    if have.is_empty() {
        return false;
    }

    let (op, want) = split_constraint(constraint);
    match (Version::parse(have), Version::parse(want)) {
        (Some(h), Some(w)) => op.accepts(h.cmp(&w)),
        _ => op == ConstraintOp::Eq && have == want,
    }
}

/// Whether the shell list advertised by an agent contains `shell`
pub fn shell_supported(agent_shells: &str, shell: &str) -> bool {
    let wanted = shell.trim().to_ascii_lowercase();
    agent_shells
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .any(|s| !s.is_empty() && s == wanted)
}

/// Decides whether an agent with `agent` capabilities may lease a job
/// requiring `required`
///
/// `requires.container.tool.*` keys are not checked here: they are
/// validated by the agent after probing the runtime container.
pub fn capabilities_match(
    agent: &HashMap<String, String>,
    required: &HashMap<String, String>,
) -> bool {
    required
        .iter()
        .all(|(key, value)| requirement_met(agent, key, value).is_ok())
}

/// Why a single requirement is not met
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    MissingTool(String),
    ToolConstraint { tool: String, constraint: String },
    MissingShell(String),
    Mismatch { key: String, value: String },
}

impl std::fmt::Display for Unmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unmet::MissingTool(tool) => write!(f, "missing tool {tool}"),
            Unmet::ToolConstraint { tool, constraint } => {
                write!(f, "tool {tool} does not satisfy {constraint}")
            }
            Unmet::MissingShell(shell) => write!(f, "no agent with shell={shell}"),
            Unmet::Mismatch { key, value } => write!(f, "no agent with {key}={value}"),
        }
    }
}

fn requirement_met(
    agent: &HashMap<String, String>,
    key: &str,
    value: &str,
) -> Result<(), Unmet> {
    if key.starts_with(CONTAINER_TOOL_REQUIREMENT_PREFIX) {
        return Ok(());
    }

    if let Some(tool) = key.strip_prefix(TOOL_REQUIREMENT_PREFIX) {
        let have = agent
            .get(&format!("{AGENT_TOOL_PREFIX}{tool}"))
            .map(String::as_str)
            .unwrap_or("");
        if have.trim().is_empty() {
            return Err(Unmet::MissingTool(tool.to_string()));
        }
        if tool_version_satisfies(have, value) {
            return Ok(());
        }
        return Err(Unmet::ToolConstraint {
            tool: tool.to_string(),
            constraint: value.trim().to_string(),
        });
    }

    if key == "shell" {
        let shells = agent.get("shells").map(String::as_str).unwrap_or("");
        if shell_supported(shells, value) {
            return Ok(());
        }
        return Err(Unmet::MissingShell(value.to_string()));
    }

    if agent.get(key).map(String::as_str) == Some(value) {
        Ok(())
    } else {
        Err(Unmet::Mismatch {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Explains why no connected agent can lease a job
///
/// Returns an empty list when at least one agent matches. Reasons are
/// collected from the agent that fails the fewest requirements.
pub fn explain_unmet(agents: &[AgentInfo], required: &HashMap<String, String>) -> Vec<String> {
    if agents.is_empty() {
        return vec!["no agents connected".to_string()];
    }

    let mut keys: Vec<&String> = required.keys().collect();
    keys.sort();

    let mut best: Option<Vec<String>> = None;
    for agent in agents {
        let caps = agent.effective_capabilities();
        let reasons: Vec<String> = keys
            .iter()
            .filter_map(|key| {
                requirement_met(&caps, key, &required[*key])
                    .err()
                    .map(|unmet| unmet.to_string())
            })
            .collect();
        if reasons.is_empty() {
            return Vec::new();
        }
        if best.as_ref().is_none_or(|b| reasons.len() < b.len()) {
            best = Some(reasons);
        }
    }
    best.unwrap_or_default()
}
