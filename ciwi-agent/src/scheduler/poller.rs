//! Job poller
//!
//! Two independent loops talk to the server:
//! - Heartbeats advertise capabilities and collect control directives
//! - Leases pull one job at a time and hand it to the execution service
//!
//! Directives are queued and applied by the lease loop between jobs, so a
//! running job is never disturbed by an update or a wipe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use ciwi_core::control::{AgentControl, ControlQueue};
use ciwi_core::dto::agent::{HeartbeatRequest, LeaseRequest};
use ciwi_update::asset::{normalize_arch, normalize_os};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, hostname};
use crate::repository::AgentRepository;
use crate::service::{ControlService, ExecutionService};

/// Ceiling of the heartbeat back-off while the server is unreachable
const MAX_HEARTBEAT_BACKOFF: Duration = Duration::from_secs(30);

/// State shared between the heartbeat and lease loops
#[derive(Default)]
struct AgentState {
    pending: ControlQueue,
    update_failure: String,
    restart_status: String,
}

/// Job poller that heartbeats, leases and executes jobs
pub struct JobPoller {
    config: AgentConfig,
    version: String,
    capabilities: HashMap<String, String>,
    agents: Arc<dyn AgentRepository>,
    execution: Arc<dyn ExecutionService>,
    control: Arc<dyn ControlService>,
    state: Arc<Mutex<AgentState>>,
    shutdown: CancellationToken,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(
        config: AgentConfig,
        version: impl Into<String>,
        capabilities: HashMap<String, String>,
        agents: Arc<dyn AgentRepository>,
        execution: Arc<dyn ExecutionService>,
        control: Arc<dyn ControlService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            version: version.into(),
            capabilities,
            agents,
            execution,
            control,
            state: Arc::new(Mutex::new(AgentState::default())),
            shutdown,
        }
    }

    /// Runs both loops until shutdown, or until a directive asks the agent to exit
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting job poller (heartbeat: {:?}, lease: {:?})",
            self.config.heartbeat_interval, self.config.lease_interval
        );

        let heartbeat = self.start_heartbeat_loop();
        self.lease_loop().await;

        self.shutdown.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task panicked: {}", e);
        }
        info!("Job poller stopped");
        Ok(())
    }

    async fn lease_loop(&self) {
        let mut interval = time::interval(self.config.lease_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            if let Some(exit_after) = self.apply_pending_controls().await {
                info!("Exiting in {:?} as requested by the server", exit_after);
                time::sleep(exit_after).await;
                return;
            }

            match self.lease_and_execute_once().await {
                Ok(true) => interval.reset_immediately(),
                Ok(false) => {}
                Err(e) => warn!("Lease cycle failed: {:#}", e),
            }
        }
    }

    /// Leases and runs at most one job; true when a job ran
    async fn lease_and_execute_once(&self) -> Result<bool> {
        debug!("Polling for a job");
        let req = LeaseRequest {
            agent_id: self.config.agent_id.clone(),
            capabilities: self.capabilities.clone(),
        };
        let response = self.agents.lease(&req).await?;
        let Some(job) = response.job_execution.filter(|_| response.assigned) else {
            return Ok(false);
        };

        let job_id = job.id.clone();
        info!(job_id = %job_id, "Leased job");
        match self.execution.execute(job).await {
            Ok(outcome) => info!(
                job_id = %job_id,
                status = %outcome.status,
                exit_code = ?outcome.exit_code,
                "Job completed"
            ),
            Err(e) => error!(job_id = %job_id, "Job execution failed: {:#}", e),
        }
        Ok(true)
    }

    /// Applies queued directives in order; returns the exit delay if one asks to exit
    async fn apply_pending_controls(&self) -> Option<Duration> {
        loop {
            let control = self.lock_state().pending.pop()?;
            info!(?control, "Applying control directive");
            let report = self.control.apply(control).await;

            {
                let mut state = self.lock_state();
                if let Some(failure) = report.update_failure {
                    state.update_failure = failure;
                }
                if let Some(status) = report.restart_status {
                    state.restart_status = status;
                }
            }

            if let Some(exit_after) = report.exit_after {
                // Best effort: let the server see the outcome before we go
                if let Err(e) = self.send_heartbeat().await {
                    debug!("Final heartbeat failed: {}", e);
                }
                return Some(exit_after);
            }
        }
    }

    async fn send_heartbeat(&self) -> Result<()> {
        let req = {
            let state = self.lock_state();
            HeartbeatRequest {
                agent_id: self.config.agent_id.clone(),
                hostname: hostname(),
                os: normalize_os(std::env::consts::OS).to_string(),
                arch: normalize_arch(std::env::consts::ARCH).to_string(),
                version: self.version.clone(),
                capabilities: self.capabilities.clone(),
                update_failure: state.update_failure.clone(),
                restart_status: state.restart_status.clone(),
                timestamp_utc: Some(Utc::now()),
            }
        };

        let response = self.agents.heartbeat(&req).await?;

        let mut state = self.lock_state();
        // Delivered; report each outcome once
        if state.update_failure == req.update_failure {
            state.update_failure.clear();
        }
        if state.restart_status == req.restart_status {
            state.restart_status.clear();
        }
        for control in response.controls() {
            if let AgentControl::Update { target, .. } = &control {
                info!(target = %target, "Update requested");
            }
            if let Some(dropped) = state.pending.push(control) {
                warn!(control = ?dropped, "Deferred directive queue full, dropped oldest");
            }
        }
        Ok(())
    }

    /// Starts the heartbeat task; it backs off while the server is unreachable
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let poller = self.clone_for_task();

        tokio::spawn(async move {
            let base = poller.config.heartbeat_interval;
            let mut delay = base;
            let mut failures: u32 = 0;

            loop {
                match poller.send_heartbeat().await {
                    Ok(()) => {
                        if failures > 0 {
                            info!("Heartbeat succeeded after {} failure(s)", failures);
                        }
                        failures = 0;
                        delay = base;
                    }
                    Err(e) => {
                        failures += 1;
                        warn!("Failed to send heartbeat (attempt {}): {}", failures, e);
                        delay = (delay * 2).min(MAX_HEARTBEAT_BACKOFF.max(base));
                    }
                }

                tokio::select! {
                    _ = poller.shutdown.cancelled() => break,
                    _ = time::sleep(delay) => {}
                }
            }
        })
    }

    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            agents: Arc::clone(&self.agents),
            execution: Arc::clone(&self.execution),
            control: Arc::clone(&self.control),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use ciwi_core::domain::job::{JobExecution, JobStatus};
    use ciwi_core::dto::agent::HeartbeatResponse;

    use super::*;
    use crate::repository::testing::FakeAgentRepository;
    use crate::service::{ControlReport, JobOutcome};

    #[derive(Default)]
    struct RecordingExecution {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExecutionService for RecordingExecution {
        async fn execute(&self, job: JobExecution) -> Result<JobOutcome> {
            self.executed.lock().unwrap().push(job.id);
            Ok(JobOutcome {
                status: JobStatus::Succeeded,
                exit_code: Some(0),
                error: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingControl {
        applied: Mutex<Vec<AgentControl>>,
        reports: Mutex<Vec<ControlReport>>,
    }

    #[async_trait]
    impl ControlService for RecordingControl {
        async fn apply(&self, control: AgentControl) -> ControlReport {
            self.applied.lock().unwrap().push(control);
            self.reports.lock().unwrap().pop().unwrap_or_default()
        }
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::new("agent-1".to_string(), "http://127.0.0.1:1".to_string());
        config.heartbeat_interval = Duration::from_millis(20);
        config.lease_interval = Duration::from_millis(20);
        config
    }

    fn poller(
        agents: Arc<FakeAgentRepository>,
        execution: Arc<RecordingExecution>,
        control: Arc<RecordingControl>,
        shutdown: CancellationToken,
    ) -> JobPoller {
        let caps = HashMap::from([("os".to_string(), "linux".to_string())]);
        JobPoller::new(config(), "v1.0.0", caps, agents, execution, control, shutdown)
    }

    #[tokio::test]
    async fn test_leases_and_executes_jobs() {
        let agents = Arc::new(FakeAgentRepository::default());
        for id in ["job-1", "job-2"] {
            agents.leases.lock().unwrap().push_back(JobExecution {
                id: id.to_string(),
                ..Default::default()
            });
        }
        let execution = Arc::new(RecordingExecution::default());
        let shutdown = CancellationToken::new();
        let poller = poller(
            agents.clone(),
            execution.clone(),
            Arc::new(RecordingControl::default()),
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move { poller.run().await });
        time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*execution.executed.lock().unwrap(), vec!["job-1", "job-2"]);
        assert!(agents.lease_requests.load(Ordering::SeqCst) >= 3);

        let heartbeats = agents.heartbeats.lock().unwrap();
        assert!(!heartbeats.is_empty());
        assert_eq!(heartbeats[0].agent_id, "agent-1");
        assert_eq!(heartbeats[0].version, "v1.0.0");
        assert_eq!(heartbeats[0].capabilities["os"], "linux");
    }

    #[tokio::test]
    async fn test_controls_are_applied_in_order() {
        let agents = Arc::new(FakeAgentRepository::default());
        let shutdown = CancellationToken::new();
        let control = Arc::new(RecordingControl::default());
        let poller = poller(
            agents,
            Arc::new(RecordingExecution::default()),
            control.clone(),
            shutdown,
        );

        {
            let mut state = poller.lock_state();
            state.pending.push(AgentControl::WipeCache);
            state.pending.push(AgentControl::Update {
                target: "v1.1.0".into(),
                repository: String::new(),
                api_base: String::new(),
            });
            state.pending.push(AgentControl::Update {
                target: "v1.2.0".into(),
                repository: String::new(),
                api_base: String::new(),
            });
            state.pending.push(AgentControl::WipeHistory);
        }

        assert_eq!(poller.apply_pending_controls().await, None);
        let applied = control.applied.lock().unwrap();
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0], AgentControl::WipeCache);
        assert!(matches!(&applied[1], AgentControl::Update { target, .. } if target == "v1.2.0"));
        assert_eq!(applied[2], AgentControl::WipeHistory);
    }

    #[tokio::test]
    async fn test_update_failure_reported_once() {
        let agents = Arc::new(FakeAgentRepository::default());
        agents
            .heartbeat_replies
            .lock()
            .unwrap()
            .push_back(HeartbeatResponse::with_control(Some(AgentControl::Update {
                target: "v2.0.0".into(),
                repository: String::new(),
                api_base: String::new(),
            })));
        let control = Arc::new(RecordingControl::default());
        control.reports.lock().unwrap().push(ControlReport {
            update_failure: Some("update preflight failed: dev build".into()),
            ..Default::default()
        });
        let poller = poller(
            agents.clone(),
            Arc::new(RecordingExecution::default()),
            control.clone(),
            CancellationToken::new(),
        );

        poller.send_heartbeat().await.unwrap();
        assert_eq!(poller.apply_pending_controls().await, None);
        poller.send_heartbeat().await.unwrap();
        poller.send_heartbeat().await.unwrap();

        let heartbeats = agents.heartbeats.lock().unwrap();
        assert_eq!(heartbeats.len(), 3);
        assert!(heartbeats[0].update_failure.is_empty());
        assert_eq!(heartbeats[1].update_failure, "update preflight failed: dev build");
        assert!(heartbeats[2].update_failure.is_empty());
    }

    #[tokio::test]
    async fn test_exit_directive_stops_poller() {
        let agents = Arc::new(FakeAgentRepository::default());
        agents
            .heartbeat_replies
            .lock()
            .unwrap()
            .push_back(HeartbeatResponse::with_control(Some(AgentControl::Restart)));
        let control = Arc::new(RecordingControl::default());
        control.reports.lock().unwrap().push(ControlReport {
            restart_status: Some("restarting".into()),
            exit_after: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let poller = poller(
            agents.clone(),
            Arc::new(RecordingExecution::default()),
            control,
            shutdown.clone(),
        );

        time::timeout(Duration::from_secs(5), poller.run())
            .await
            .expect("poller should exit on its own")
            .unwrap();
        assert!(shutdown.is_cancelled());
        assert!(
            agents
                .heartbeats
                .lock()
                .unwrap()
                .iter()
                .any(|h| h.restart_status == "restarting")
        );
    }
}
