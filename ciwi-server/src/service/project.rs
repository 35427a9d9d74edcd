//! Project Service
//!
//! Loads project configs (YAML) into the store and expands pipelines into
//! concrete job executions when triggered.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use ciwi_core::domain::job::{JobStepPlanItem, SourceSpec, StepKind};
use ciwi_core::domain::metadata;
use ciwi_core::domain::project::{
    PipelineDetail, PipelineJob, Project, ProjectDetail, ProjectSecretSpec, ProjectSummary,
};
use ciwi_core::dto::job::CreateJobExecution;
use ciwi_core::dto::project::{LoadProjectRequest, TriggerPipelineRequest};
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::repository::project_repository;
use crate::service::job::{self as job_service, JobError};
use crate::service::secret::{self as secret_service, SecretError, SecretResolver};

/// Service error type
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =============================================================================
// Config Schema
// =============================================================================

/// Top level of a project config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub version: u32,
    pub project: ProjectSection,
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub name: String,
    pub repo_url: String,
    pub repo_ref: String,
    pub secrets: Vec<ProjectSecretSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub id: String,
    pub source: Option<SourceSpec>,
    pub jobs: Vec<PipelineJob>,
}

/// Parse and validate a project config
pub fn parse_config(yaml: &str) -> Result<ProjectConfig, ProjectError> {
    let config: ProjectConfig = serde_yaml::from_str(yaml)
        .map_err(|e| ProjectError::Validation(format!("invalid project config: {e}")))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ProjectConfig) -> Result<(), ProjectError> {
    let invalid = |msg: String| Err(ProjectError::Validation(msg));

    if config.version > 1 {
        return invalid(format!("unsupported config version {}", config.version));
    }
    if config.project.name.trim().is_empty() {
        return invalid("project.name is required".to_string());
    }
    if config.project.secrets.iter().any(|s| s.name.trim().is_empty()) {
        return invalid("every secret needs a name".to_string());
    }

    let mut pipeline_ids = HashSet::new();
    for pipeline in &config.pipelines {
        if pipeline.id.trim().is_empty() {
            return invalid("every pipeline needs an id".to_string());
        }
        if !pipeline_ids.insert(pipeline.id.as_str()) {
            return invalid(format!("duplicate pipeline id {}", pipeline.id));
        }

        let mut job_ids: HashSet<&str> = HashSet::new();
        for job in &pipeline.jobs {
            let where_ = format!("{}/{}", pipeline.id, job.id);
            if job.id.trim().is_empty() {
                return invalid(format!("pipeline {}: every job needs an id", pipeline.id));
            }
            if job_ids.contains(job.id.as_str()) {
                return invalid(format!("duplicate job id {where_}"));
            }
            if job.timeout_seconds < 0 {
                return invalid(format!("{where_}: timeout_seconds must be >= 0"));
            }
            if job.steps.is_empty() {
                return invalid(format!("{where_}: at least one step is required"));
            }
            for step in &job.steps {
                if step.kind != StepKind::DryrunSkip && step.run.trim().is_empty() {
                    return invalid(format!("{where_}: step {:?} has no run script", step.name));
                }
                if step.test_report.is_some() && step.test_format.is_none() {
                    return invalid(format!("{where_}: step {:?} needs test_format", step.name));
                }
                if step.coverage_report.is_some() && step.coverage_format.is_none() {
                    return invalid(format!(
                        "{where_}: step {:?} needs coverage_format",
                        step.name
                    ));
                }
            }
            for need in &job.needs {
                if !job_ids.contains(need.as_str()) {
                    return invalid(format!(
                        "{where_}: needs {need}, which must be an earlier job in the pipeline"
                    ));
                }
            }
            if let Some(container) = &job.requires.container
                && container.image.trim().is_empty()
            {
                return invalid(format!("{where_}: requires.container.image is required"));
            }
            job_ids.insert(job.id.as_str());
        }
    }

    Ok(())
}

// =============================================================================
// Load & Read
// =============================================================================

/// Load (or reload) a project from config text
pub async fn load_project(
    pool: &SqlitePool,
    req: LoadProjectRequest,
) -> Result<ProjectDetail, ProjectError> {
    let config = parse_config(&req.config_yaml)?;

    let project = Project {
        name: config.project.name.trim().to_string(),
        repo_url: config.project.repo_url,
        repo_ref: config.project.repo_ref,
        config_file: req.config_file,
        ..Default::default()
    };
    let pipelines: Vec<PipelineDetail> = config
        .pipelines
        .into_iter()
        .map(|p| {
            let source = p.source.unwrap_or_default();
            PipelineDetail {
                pipeline_id: p.id,
                source_repo: source.repo,
                source_ref: source.git_ref,
                jobs: p.jobs,
                ..Default::default()
            }
        })
        .collect();

    let id = project_repository::replace_tree(pool, &project, &pipelines, &config.project.secrets)
        .await?;
    tracing::info!(project = %project.name, pipelines = pipelines.len(), "Project loaded");

    get_project(pool, id).await
}

/// List all projects
pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<ProjectSummary>, ProjectError> {
    Ok(project_repository::list_summaries(pool).await?)
}

/// Get a project by ID with its pipeline tree
pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<ProjectDetail, ProjectError> {
    project_repository::find_detail(pool, id)
        .await?
        .ok_or_else(|| ProjectError::NotFound(format!("project {id}")))
}

// =============================================================================
// Trigger
// =============================================================================

/// One execution a trigger will enqueue
#[derive(Debug, Clone)]
pub struct PlannedExecution {
    pub pipeline_job_id: String,
    pub needs: Vec<String>,
    pub request: CreateJobExecution,
}

/// Trigger a pipeline: expand it and enqueue every execution
///
/// Returns the new execution ids in enqueue order.
pub async fn trigger_pipeline(
    pool: &SqlitePool,
    resolver: &dyn SecretResolver,
    pipeline_db_id: i64,
    req: TriggerPipelineRequest,
) -> Result<Vec<String>, ProjectError> {
    let project_id = project_repository::find_pipeline_project(pool, pipeline_db_id)
        .await?
        .ok_or_else(|| ProjectError::NotFound(format!("pipeline {pipeline_db_id}")))?;
    let detail = get_project(pool, project_id).await?;
    let pipeline = detail
        .pipelines
        .iter()
        .find(|p| p.id == pipeline_db_id)
        .ok_or_else(|| ProjectError::NotFound(format!("pipeline {pipeline_db_id}")))?;

    let secrets = secret_service::resolve_all(pool, resolver, &detail.secrets).await?;

    let run_id = format!("run-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let planned = expand_pipeline(&detail.project, pipeline, req.source_ref.trim(), &run_id);

    let mut executions_by_job: HashMap<String, Vec<String>> = HashMap::new();
    let mut ids = Vec::with_capacity(planned.len());

    for plan in planned {
        let mut request = plan.request;

        if !plan.needs.is_empty() {
            let needed: Vec<String> = plan
                .needs
                .iter()
                .flat_map(|need| executions_by_job.get(need).cloned().unwrap_or_default())
                .collect();
            request
                .metadata
                .insert(metadata::NEEDS_BLOCKED.to_string(), "1".to_string());
            request
                .metadata
                .insert(metadata::NEEDS_JOB_IDS.to_string(), needed.join(","));
        }

        if !secrets.is_empty() {
            for (name, value) in &secrets {
                request.env.insert(name.clone(), value.clone());
                request.sensitive_values.push(value.clone());
            }
            request
                .metadata
                .insert(metadata::HAS_SECRETS.to_string(), "1".to_string());
        }

        let job = job_service::enqueue(pool, request).await?;
        executions_by_job
            .entry(plan.pipeline_job_id)
            .or_default()
            .push(job.id.clone());
        ids.push(job.id);
    }

    tracing::info!(
        project = %detail.project.name,
        pipeline = %pipeline.pipeline_id,
        run_id = %run_id,
        executions = ids.len(),
        "Pipeline triggered"
    );
    Ok(ids)
}

/// Expand every job of a pipeline into one execution per matrix include
pub fn expand_pipeline(
    project: &Project,
    pipeline: &PipelineDetail,
    source_ref_override: &str,
    run_id: &str,
) -> Vec<PlannedExecution> {
    let repo = first_non_empty(&pipeline.source_repo, &project.repo_url);
    let git_ref = if source_ref_override.is_empty() {
        first_non_empty(&pipeline.source_ref, &project.repo_ref)
    } else {
        source_ref_override
    };
    let source = (!repo.is_empty()).then(|| SourceSpec {
        repo: repo.to_string(),
        git_ref: git_ref.to_string(),
    });

    let mut planned = Vec::new();
    for job in &pipeline.jobs {
        if job.matrix.include.is_empty() {
            planned.push(plan_execution(project, pipeline, job, None, source.clone(), run_id));
        } else {
            for (index, vars) in job.matrix.include.iter().enumerate() {
                planned.push(plan_execution(
                    project,
                    pipeline,
                    job,
                    Some((index, vars)),
                    source.clone(),
                    run_id,
                ));
            }
        }
    }
    planned
}

fn plan_execution(
    project: &Project,
    pipeline: &PipelineDetail,
    job: &PipelineJob,
    matrix: Option<(usize, &BTreeMap<String, String>)>,
    source: Option<SourceSpec>,
    run_id: &str,
) -> PlannedExecution {
    let empty = BTreeMap::new();
    let vars = matrix.map(|(_, vars)| vars).unwrap_or(&empty);

    let mut required: HashMap<String, String> = job
        .runs_on
        .iter()
        .map(|(k, v)| (k.clone(), substitute_matrix(v, vars)))
        .collect();
    for (tool, constraint) in &job.requires.tools {
        required.insert(
            format!("{}{tool}", metadata::TOOL_REQUIREMENT_PREFIX),
            constraint.clone(),
        );
    }

    let mut meta = HashMap::from([
        (metadata::PROJECT_NAME.to_string(), project.name.clone()),
        (metadata::PROJECT_ID.to_string(), project.id.to_string()),
        (metadata::PIPELINE_ID.to_string(), pipeline.pipeline_id.clone()),
        (metadata::PIPELINE_JOB_ID.to_string(), job.id.clone()),
        (metadata::PIPELINE_RUN_ID.to_string(), run_id.to_string()),
    ]);
    if let Some((index, vars)) = matrix {
        meta.insert(metadata::MATRIX_INDEX.to_string(), index.to_string());
        meta.insert(metadata::MATRIX_NAME.to_string(), matrix_name(vars));
    }

    if let Some(container) = &job.requires.container {
        for (tool, constraint) in &container.tools {
            required.insert(
                format!("{}{tool}", metadata::CONTAINER_TOOL_REQUIREMENT_PREFIX),
                constraint.clone(),
            );
        }
        meta.insert(
            metadata::RUNTIME_CONTAINER_IMAGE.to_string(),
            substitute_matrix(&container.image, vars),
        );
        let optional = [
            (metadata::CONTAINER_WORKDIR, container.workdir.clone()),
            (metadata::CONTAINER_USER, container.user.clone()),
            (metadata::CONTAINER_DEVICES, container.devices.join(",")),
            (metadata::CONTAINER_GROUPS, container.groups.join(",")),
        ];
        for (key, value) in optional {
            if !value.is_empty() {
                meta.insert(key.to_string(), value);
            }
        }
    }

    let step_plan = job
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| JobStepPlanItem {
            name: if step.name.trim().is_empty() {
                format!("step {}", i + 1)
            } else {
                substitute_matrix(&step.name, vars)
            },
            script: substitute_matrix(&step.run, vars),
            env: step
                .env
                .iter()
                .map(|(k, v)| (k.clone(), substitute_matrix(v, vars)))
                .collect(),
            kind: step.kind,
            test_report_path: step.test_report.as_deref().map(|p| substitute_matrix(p, vars)),
            test_report_format: step.test_format,
            coverage_report_path: step
                .coverage_report
                .as_deref()
                .map(|p| substitute_matrix(p, vars)),
            coverage_report_format: step.coverage_format,
        })
        .collect();

    PlannedExecution {
        pipeline_job_id: job.id.clone(),
        needs: job.needs.clone(),
        request: CreateJobExecution {
            script: String::new(),
            step_plan,
            env: HashMap::new(),
            required_capabilities: required,
            timeout_seconds: job.timeout_seconds,
            source,
            artifact_globs: job
                .artifacts
                .iter()
                .map(|g| substitute_matrix(g, vars))
                .collect(),
            caches: job.caches.clone(),
            metadata: meta,
            sensitive_values: Vec::new(),
        },
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.trim().is_empty() { b } else { a }
}

/// `name` from the include, else its `k=v` pairs
fn matrix_name(vars: &BTreeMap<String, String>) -> String {
    if let Some(name) = vars.get("name").filter(|n| !n.is_empty()) {
        return name.clone();
    }
    vars.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Replace `{{ matrix.<key> }}` placeholders; unknown keys are left alone
pub fn substitute_matrix(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        let inner = rest[start + 2..start + len].trim();
        let value = inner
            .strip_prefix("matrix.")
            .and_then(|key| vars.get(key.trim()));

        out.push_str(&rest[..start]);
        match value {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_pool;
    use crate::repository::job_repository;
    use crate::service::secret::EnvSecretResolver;
    use ciwi_core::domain::job::JobStatus;

    const CONFIG: &str = r#"
version: 1
project:
  name: ciwi
  repo_url: https://github.com/izzyreal/ciwi.git
  repo_ref: main
pipelines:
  - id: build
    jobs:
      - id: compile
        runs_on:
          os: "{{ matrix.os }}"
        requires:
          tools:
            go: ">=1.24"
        timeout_seconds: 900
        artifacts: ["dist/{{ matrix.os }}/**"]
        matrix:
          include:
            - name: linux-amd64
              os: linux
            - name: darwin-arm64
              os: darwin
        steps:
          - name: build
            run: GOOS={{matrix.os}} go build -o dist/ ./...
          - name: test
            kind: test
            run: go test -json ./... > test.json
            test_report: test.json
            test_format: go-test-json
      - id: package
        needs: [compile]
        requires:
          container:
            image: alpine:3.20
            tools:
              tar: "*"
        steps:
          - name: tar
            run: tar czf out.tgz dist
"#;

    #[test]
    fn test_parse_config_rejects_forward_needs() {
        let yaml = r#"
project:
  name: x
pipelines:
  - id: p
    jobs:
      - id: a
        needs: [b]
        steps: [{ name: s, run: "true" }]
      - id: b
        steps: [{ name: s, run: "true" }]
"#;
        assert!(matches!(parse_config(yaml), Err(ProjectError::Validation(_))));
        assert!(matches!(parse_config("project: ["), Err(ProjectError::Validation(_))));
        assert!(parse_config(CONFIG).is_ok());
    }

    #[test]
    fn test_substitute_matrix() {
        let vars = BTreeMap::from([("os".to_string(), "linux".to_string())]);
        assert_eq!(substitute_matrix("GOOS={{ matrix.os }} x", &vars), "GOOS=linux x");
        assert_eq!(substitute_matrix("{{matrix.os}}", &vars), "linux");
        assert_eq!(substitute_matrix("{{ matrix.arch }}", &vars), "{{ matrix.arch }}");
        assert_eq!(substitute_matrix("a {{ unterminated", &vars), "a {{ unterminated");
    }

    #[test]
    fn test_expand_pipeline_matrix_and_container() {
        let config = parse_config(CONFIG).unwrap();
        let project = Project {
            id: 7,
            name: config.project.name.clone(),
            repo_url: config.project.repo_url.clone(),
            repo_ref: config.project.repo_ref.clone(),
            ..Default::default()
        };
        let pipeline = PipelineDetail {
            pipeline_id: "build".to_string(),
            jobs: config.pipelines[0].jobs.clone(),
            ..Default::default()
        };

        let planned = expand_pipeline(&project, &pipeline, "", "run-1");
        assert_eq!(planned.len(), 3);

        let linux = &planned[0].request;
        assert_eq!(linux.required_capabilities["os"], "linux");
        assert_eq!(linux.required_capabilities["requires.tool.go"], ">=1.24");
        assert_eq!(linux.metadata[metadata::MATRIX_NAME], "linux-amd64");
        assert_eq!(linux.metadata[metadata::PROJECT_ID], "7");
        assert_eq!(linux.step_plan[0].script, "GOOS=linux go build -o dist/ ./...");
        assert_eq!(linux.step_plan[1].kind, StepKind::Test);
        assert_eq!(linux.artifact_globs, vec!["dist/linux/**"]);
        assert_eq!(linux.source.as_ref().unwrap().git_ref, "main");

        assert_eq!(planned[1].request.required_capabilities["os"], "darwin");

        let package = &planned[2];
        assert_eq!(package.needs, vec!["compile"]);
        assert_eq!(
            package.request.metadata[metadata::RUNTIME_CONTAINER_IMAGE],
            "alpine:3.20"
        );
        assert_eq!(
            package.request.required_capabilities["requires.container.tool.tar"],
            "*"
        );

        let overridden = expand_pipeline(&project, &pipeline, "v1.2.3", "run-2");
        assert_eq!(overridden[0].request.source.as_ref().unwrap().git_ref, "v1.2.3");
    }

    #[tokio::test]
    async fn test_load_and_trigger_gates_dependents() {
        let (_dir, pool) = temp_pool().await;
        let detail = load_project(
            &pool,
            LoadProjectRequest {
                config_yaml: CONFIG.to_string(),
                config_file: "ciwi.yaml".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(detail.project.config_file, "ciwi.yaml");
        let pipeline_id = detail.pipelines[0].id;

        let ids = trigger_pipeline(
            &pool,
            &EnvSecretResolver,
            pipeline_id,
            TriggerPipelineRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(ids.len(), 3);

        let package = job_repository::find_by_id(&pool, &ids[2]).await.unwrap().unwrap();
        assert_eq!(package.status, JobStatus::Queued);
        assert!(package.is_blocked());
        assert_eq!(
            package.meta(metadata::NEEDS_JOB_IDS),
            format!("{},{}", ids[0], ids[1])
        );

        let queued = job_repository::list_queued(&pool).await.unwrap();
        assert_eq!(queued.len(), 2);

        assert!(matches!(
            trigger_pipeline(&pool, &EnvSecretResolver, 9999, TriggerPipelineRequest::default())
                .await,
            Err(ProjectError::NotFound(_))
        ));
    }
}
