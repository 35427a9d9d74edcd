//! Reserved job metadata keys

pub const ADHOC: &str = "adhoc";
pub const ADHOC_AGENT_ID: &str = "adhoc_agent_id";
pub const CHAIN_BLOCKED: &str = "chain_blocked";
pub const NEEDS_BLOCKED: &str = "needs_blocked";
/// Comma separated execution ids a needs-blocked job waits for
pub const NEEDS_JOB_IDS: &str = "needs_job_ids";
pub const HAS_SECRETS: &str = "has_secrets";

pub const PROJECT_ID: &str = "project_id";
pub const PROJECT_NAME: &str = "project";
pub const PIPELINE_ID: &str = "pipeline_id";
pub const PIPELINE_JOB_ID: &str = "pipeline_job_id";
pub const MATRIX_NAME: &str = "matrix_name";
pub const MATRIX_INDEX: &str = "matrix_index";
/// Shared by every execution created by one pipeline trigger
pub const PIPELINE_RUN_ID: &str = "pipeline_run_id";

pub const RUNTIME_CONTAINER_IMAGE: &str = "runtime_probe.container_image";
pub const CONTAINER_WORKDIR: &str = "runtime_exec.container_workdir";
pub const CONTAINER_USER: &str = "runtime_exec.container_user";
/// Comma separated host device paths passed with `--device`
pub const CONTAINER_DEVICES: &str = "runtime_exec.container_devices";
/// Comma separated groups passed with `--group-add`
pub const CONTAINER_GROUPS: &str = "runtime_exec.container_groups";

/// Environment variables listing dependency jobs whose artifacts are downloaded
pub const DEP_ARTIFACT_JOB_ID_ENV: &str = "CIWI_DEP_ARTIFACT_JOB_ID";
pub const DEP_ARTIFACT_JOB_IDS_ENV: &str = "CIWI_DEP_ARTIFACT_JOB_IDS";

/// Capability keys
pub const TOOL_REQUIREMENT_PREFIX: &str = "requires.tool.";
pub const CONTAINER_TOOL_REQUIREMENT_PREFIX: &str = "requires.container.tool.";
pub const AGENT_TOOL_PREFIX: &str = "tool.";
pub const HOST_TOOL_RUNTIME_PREFIX: &str = "host.tool.";
pub const CONTAINER_TOOL_RUNTIME_PREFIX: &str = "container.tool.";
