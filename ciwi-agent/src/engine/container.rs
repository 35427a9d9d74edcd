//! Runtime container management
//!
//! Handles the optional per-job runtime container:
//! - Starting a detached `sleep infinity` container with the execution
//!   directory and cache paths mounted
//! - Verifying it is running
//! - Building `docker exec` commands for step scripts and probes
//! - Removing it when the job ends

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use ciwi_core::domain::job::JobExecution;
use ciwi_core::domain::metadata;
use tracing::{debug, info, warn};

use super::process::{ProcessSpec, capture_output};
use super::shell::Shell;
use super::workspace::{fnv1a64, sanitize_segment};

/// Workdir inside the container when the job does not set one
pub const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";

/// Bound on `docker run`, `inspect` and `rm`
const DOCKER_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything needed to start a job's runtime container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub workdir: String,
    pub user: Option<String>,
    pub devices: Vec<String>,
    pub groups: Vec<String>,
    pub exec_dir: PathBuf,
    /// Host cache directories, mounted at the same path
    pub cache_mounts: Vec<PathBuf>,
}

impl ContainerSpec {
    /// Container requested by the job's metadata, if any
    pub fn from_job(job: &JobExecution, exec_dir: &Path, cache_mounts: Vec<PathBuf>) -> Option<Self> {
        let image = job.meta(metadata::RUNTIME_CONTAINER_IMAGE).trim();
        if image.is_empty() {
            return None;
        }

        let workdir = match job.meta(metadata::CONTAINER_WORKDIR).trim() {
            "" => DEFAULT_CONTAINER_WORKDIR.to_string(),
            w => w.to_string(),
        };
        let user = Some(job.meta(metadata::CONTAINER_USER).trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Some(Self {
            image: image.to_string(),
            workdir,
            user,
            devices: split_list(job.meta(metadata::CONTAINER_DEVICES)),
            groups: split_list(job.meta(metadata::CONTAINER_GROUPS)),
            exec_dir: exec_dir.to_path_buf(),
            cache_mounts,
        })
    }

    /// `docker run` arguments for `name`
    pub fn run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--workdir".to_string(),
            self.workdir.clone(),
        ];
        if let Some(user) = &self.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        args.push("--mount".to_string());
        args.push(bind_mount(&self.exec_dir.to_string_lossy(), &self.workdir));
        for cache in &self.cache_mounts {
            let path = cache.to_string_lossy();
            args.push("--mount".to_string());
            args.push(bind_mount(&path, &path));
        }
        for device in &self.devices {
            args.push("--device".to_string());
            args.push(device.clone());
        }
        for group in &self.groups {
            args.push("--group-add".to_string());
            args.push(group.clone());
        }
        args.push("--entrypoint".to_string());
        args.push("sleep".to_string());
        args.push(self.image.clone());
        args.push("infinity".to_string());
        args
    }
}

fn bind_mount(source: &str, target: &str) -> String {
    format!("type=bind,source={source},target={target}")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Container name for a job and image
pub fn container_name(job_id: &str, image: &str) -> String {
    format!(
        "ciwi-{}-{:x}",
        sanitize_segment(job_id).to_ascii_lowercase(),
        fnv1a64(image.as_bytes()) as u32
    )
}

/// A started runtime container; removed on [`RuntimeContainer::remove`] or drop
pub struct RuntimeContainer {
    name: String,
    workdir: String,
    docker: String,
    removed: AtomicBool,
}

impl RuntimeContainer {
    /// Starts the container and checks that it is running
    pub async fn start(spec: &ContainerSpec, job_id: &str) -> Result<Self> {
        let name = container_name(job_id, &spec.image);
        let container = Self {
            name: name.clone(),
            workdir: spec.workdir.clone(),
            docker: docker_program(),
            removed: AtomicBool::new(false),
        };

        // A leftover from a crashed run would make the name collide
        container.force_remove().await;

        info!(container = %name, image = %spec.image, "Starting runtime container");
        let run = ProcessSpec::new(&container.docker).args(spec.run_args(&name));
        let (outcome, text) = capture_output(&run, DOCKER_TIMEOUT)
            .await
            .context("failed to execute docker run")?;
        if !outcome.success() {
            anyhow::bail!(
                "docker run failed for image {} (exit {:?}): {}",
                spec.image,
                outcome.exit_code(),
                text.trim()
            );
        }
        debug!(container = %name, "docker run: {}", text.trim());

        let inspect = ProcessSpec::new(&container.docker).args([
            "inspect",
            "-f",
            "{{.State.Running}}",
            name.as_str(),
        ]);
        let (outcome, text) = capture_output(&inspect, DOCKER_TIMEOUT)
            .await
            .context("failed to execute docker inspect")?;
        if !outcome.success() || text.trim() != "true" {
            anyhow::bail!("container {} is not running: {}", name, text.trim());
        }

        Ok(container)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Command that runs `script` in the container under `shell`
    ///
    /// Variables are forwarded by name so their values never appear on the
    /// docker command line; the container sees only `env`, not the host
    /// environment.
    pub fn exec_command(&self, shell: Shell, script: &str, env: &HashMap<String, String>) -> ProcessSpec {
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();

        let mut spec = ProcessSpec::new(&self.docker)
            .arg("exec")
            .arg("-w")
            .arg(&self.workdir);
        for key in keys {
            spec = spec.arg("--env").arg(key.as_str());
        }
        spec.arg(&self.name)
            .args(shell.container_args(script))
            .envs(env)
    }

    /// Stops and removes the container
    pub async fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.force_remove().await;
        info!(container = %self.name, "Runtime container removed");
    }

    async fn force_remove(&self) {
        let rm = ProcessSpec::new(&self.docker).args(["rm", "-f", self.name.as_str()]);
        match capture_output(&rm, DOCKER_TIMEOUT).await {
            Ok((outcome, _)) if outcome.success() => {}
            Ok((_, text)) => debug!(container = %self.name, "docker rm: {}", text.trim()),
            Err(e) => warn!(container = %self.name, "Failed to remove container: {:#}", e),
        }
    }
}

impl Drop for RuntimeContainer {
    fn drop(&mut self) {
        if self.removed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = std::process::Command::new(&self.docker)
            .args(["rm", "-f", self.name.as_str()])
            .output()
        {
            warn!(container = %self.name, "Failed to remove container on drop: {}", e);
        }
    }
}

fn docker_program() -> String {
    std::env::var("CIWI_DOCKER_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "docker".to_string())
}
