// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Process supervision
//!
//! Spawns the worker process backing one agent run, tracks it in the state
//! store and terminates it on request. Workers outlive the orchestrator that
//! started them; a later invocation controls them through their records.

pub mod control;
pub mod os;
mod ports;
mod probe;

pub use control::ControlMessage;
pub use ports::PortAllocator;
pub use probe::{LivenessProbe, PortProbe, StopTargets};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::WorkerConfig;
use crate::state::{RecordSnapshot, RunRecord, RunStatus, StateStore};
use os::Signal;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(2);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// What to start for one agent
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub agent_name: String,
    /// Rendered instructions handed to the worker
    pub instructions: String,
    pub work_dir: PathBuf,
    /// Declared output, used as the completion signal
    pub output_path: Option<PathBuf>,
}

/// A worker started by this process
#[derive(Debug)]
pub struct AgentHandle {
    agent_name: String,
    pid: u32,
    port: u16,
    started_at: DateTime<Utc>,
    output_path: Option<PathBuf>,
    output_baseline: Option<SystemTime>,
    child: Child,
}

impl AgentHandle {
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Size of the output if it was written after the spawn
    fn output_progress(&self) -> Option<u64> {
        let meta = std::fs::metadata(self.output_path.as_ref()?).ok()?;
        let modified = meta.modified().ok()?;
        match self.output_baseline {
            Some(baseline) if modified <= baseline => None,
            _ => Some(meta.len()),
        }
    }
}

/// How waiting on a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// The process exited
    Exited { code: Option<i32>, success: bool },
    /// The declared output was written and stopped changing
    OutputReady,
    /// The caller's timeout elapsed first
    TimedOut,
}

/// Terminal state of one supervised run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExit {
    pub status: RunStatus,
    pub error: Option<String>,
}

impl AgentExit {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// What a stop request found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No record exists for the agent
    NotTracked,
    /// The record exists but no live process belongs to it
    NotRunning,
    /// A live process was signalled and is gone
    Terminated,
}

/// Spawns, tracks and terminates agent worker processes
pub struct ProcessSupervisor {
    store: Arc<dyn StateStore>,
    probe: Arc<dyn LivenessProbe>,
    worker: WorkerConfig,
    state_dir: PathBuf,
    ports: PortAllocator,
    /// Held from port choice until the record is written
    port_guard: Mutex<()>,
}

impl ProcessSupervisor {
    pub fn new(
        store: Arc<dyn StateStore>,
        probe: Arc<dyn LivenessProbe>,
        worker: WorkerConfig,
        state_dir: PathBuf,
    ) -> Self {
        let ports = PortAllocator::new(worker.ports);
        Self {
            store,
            probe,
            worker,
            state_dir,
            ports,
            port_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    /// Log file of an agent's worker
    pub fn log_path(&self, agent: &str) -> PathBuf {
        self.state_dir.join("logs").join(format!("{}.log", agent))
    }

    /// Instructions file handed to an agent's worker
    pub fn instructions_path(&self, agent: &str) -> PathBuf {
        self.state_dir.join("instructions").join(format!("{}.md", agent))
    }

    /// Start the worker for one agent and record it as `Running`
    pub async fn spawn(&self, request: SpawnRequest) -> AgentflowResult<AgentHandle> {
        let agent = request.agent_name.as_str();
        let _claim = self.store.claim(agent).await?;

        match self.store.get(agent).await {
            Ok(Some(existing))
                if existing.status == RunStatus::Running && self.probe.is_alive(&existing) =>
            {
                return Err(AgentflowError::AlreadyRunning {
                    agent: agent.to_string(),
                    pid: existing.pid,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(agent, error = %e, "replacing unreadable record"),
        }

        let program = which::which(&self.worker.command)
            .map_err(|_| AgentflowError::runtime_not_found(&self.worker.command))?;

        let prompt_file = self.instructions_path(agent);
        write_file(&prompt_file, request.instructions.as_bytes())?;
        let (stdout, stderr) = self.open_log(agent)?;

        let output_baseline = request
            .output_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());

        let _ports = self.port_guard.lock().await;
        let reserved = self.reserved_ports(agent).await?;
        let port = self.ports.allocate(agent, &reserved)?;

        let output = request
            .output_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let vars = [
            ("port", port.to_string()),
            ("agent", agent.to_string()),
            ("prompt_file", prompt_file.display().to_string()),
            ("output", output),
            ("work_dir", request.work_dir.display().to_string()),
        ];

        let mut cmd = Command::new(&program);
        cmd.args(self.worker.args.iter().map(|a| substitute(a, &vars)))
            .current_dir(&request.work_dir)
            .envs(&self.worker.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        for (key, value) in &vars {
            cmd.env(format!("AGENTFLOW_{}", key.to_uppercase()), value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(agent, program = %program.display(), port, "spawning worker");
        let mut child = cmd.spawn().map_err(|e| AgentflowError::SpawnFailed {
            agent: agent.to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| AgentflowError::SpawnFailed {
            agent: agent.to_string(),
            reason: "process exited before it could be tracked".to_string(),
        })?;

        let mut record = RunRecord::running(agent, pid, port);
        record.output_path = request.output_path.clone();
        if let Err(e) = self.store.put(&record).await {
            warn!(agent, pid, error = %e, "failed to record worker; terminating it");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(e);
        }

        info!(agent, pid, port, "agent started");
        Ok(AgentHandle {
            agent_name: agent.to_string(),
            pid,
            port,
            started_at: record.started_at,
            output_path: request.output_path,
            output_baseline,
            child,
        })
    }

    /// Wait until the worker exits, its output is ready, or `timeout` elapses
    ///
    /// `None` waits indefinitely.
    pub async fn await_completion(
        &self,
        handle: &mut AgentHandle,
        timeout: Option<Duration>,
    ) -> AgentflowResult<AwaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let poll = self.worker.poll_interval();
        let mut last_size = None;

        loop {
            tokio::select! {
                status = handle.child.wait() => {
                    let status = status?;
                    debug!(agent = %handle.agent_name, ?status, "worker exited");
                    return Ok(AwaitOutcome::Exited {
                        code: status.code(),
                        success: status.success(),
                    });
                }
                _ = tokio::time::sleep(poll) => {}
            }

            match handle.output_progress() {
                Some(size) if last_size == Some(size) => return Ok(AwaitOutcome::OutputReady),
                progress => last_size = progress,
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(AwaitOutcome::TimedOut);
            }
        }
    }

    /// Record the terminal state of a run, stopping the worker when needed
    pub async fn finish(
        &self,
        mut handle: AgentHandle,
        outcome: AwaitOutcome,
    ) -> AgentflowResult<AgentExit> {
        let agent = handle.agent_name.clone();

        let (status, error) = match outcome {
            AwaitOutcome::Exited { success: true, .. } => match &handle.output_path {
                Some(output) if !output.exists() => (
                    RunStatus::Failed,
                    Some(format!("exited without producing '{}'", output.display())),
                ),
                _ => (RunStatus::Completed, None),
            },
            AwaitOutcome::Exited { code, success: false } => (
                RunStatus::Failed,
                Some(match code {
                    Some(code) => format!("exited with status {}", code),
                    None => "terminated by signal".to_string(),
                }),
            ),
            AwaitOutcome::OutputReady => {
                if self.worker.stop_on_output {
                    self.terminate_child(&mut handle).await;
                }
                (RunStatus::Completed, None)
            }
            AwaitOutcome::TimedOut => {
                self.terminate_child(&mut handle).await;
                (RunStatus::Failed, Some("timed out".to_string()))
            }
        };

        let stored = self.store.transition(&agent, status, error.clone()).await?;
        let exit = match stored {
            Some(record) if record.status == RunStatus::Stopped => AgentExit {
                status: RunStatus::Stopped,
                error: Some("stopped before completion".to_string()),
            },
            _ => AgentExit { status, error },
        };

        info!(agent = %agent, status = %exit.status, "agent finished");
        Ok(exit)
    }

    /// Stop the process bound to an agent and mark its record `Stopped`
    ///
    /// An agent without a record or without a live process is not an error.
    pub async fn stop(&self, agent: &str) -> AgentflowResult<StopOutcome> {
        let Some(record) = self.store.get(agent).await? else {
            debug!(agent, "no record; nothing to stop");
            return Ok(StopOutcome::NotTracked);
        };

        let targets = self.probe.stop_targets(&record);
        let outcome = if targets.is_empty() {
            StopOutcome::NotRunning
        } else {
            self.terminate(&record, &targets).await?;
            StopOutcome::Terminated
        };

        self.store.transition(agent, RunStatus::Stopped, None).await?;
        info!(agent, pid = record.pid, ?outcome, "agent stopped");
        Ok(outcome)
    }

    /// Stop every agent with a `Running` record, each independently
    pub async fn stop_all(self: &Arc<Self>) -> Vec<(String, AgentflowResult<StopOutcome>)> {
        let running: Vec<String> = match self.store.list().await {
            Ok(snapshots) => snapshots
                .iter()
                .filter_map(RecordSnapshot::record)
                .filter(|r| r.status == RunStatus::Running)
                .map(|r| r.agent_name.clone())
                .collect(),
            Err(e) => {
                warn!(error = %e, "cannot list agents to stop");
                return Vec::new();
            }
        };

        let budget = self.worker.grace_period() + KILL_WAIT * 2;
        let mut tasks = JoinSet::new();
        for agent in running {
            let supervisor = Arc::clone(self);
            tasks.spawn(async move {
                let result = match tokio::time::timeout(budget, supervisor.stop(&agent)).await {
                    Ok(result) => result,
                    Err(_) => Err(AgentflowError::StopFailed {
                        agent: agent.clone(),
                        pid: 0,
                        reason: format!("no response within {:?}", budget),
                    }),
                };
                (agent, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(error = %e, "stop task panicked"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Whether an agent has a live `Running` process
    pub async fn is_alive(&self, agent: &str) -> AgentflowResult<bool> {
        Ok(self
            .store
            .get(agent)
            .await?
            .is_some_and(|r| r.status == RunStatus::Running && self.probe.is_alive(&r)))
    }

    /// Whether the process behind a record is alive
    pub fn record_alive(&self, record: &RunRecord) -> bool {
        self.probe.is_alive(record)
    }

    /// Deliver guidance to a running agent over its control port
    pub async fn send_message(&self, agent: &str, text: &str) -> AgentflowResult<()> {
        let record = self
            .store
            .get(agent)
            .await?
            .filter(|r| r.status == RunStatus::Running && self.probe.is_alive(r))
            .ok_or_else(|| AgentflowError::AgentNotRunning {
                agent: agent.to_string(),
            })?;

        let message = ControlMessage::Message {
            content: text.to_string(),
        };
        control::deliver(agent, record.control_port, &message, MESSAGE_TIMEOUT).await?;
        debug!(agent, port = record.control_port, "message delivered");
        Ok(())
    }

    async fn reserved_ports(&self, agent: &str) -> AgentflowResult<HashSet<u16>> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .filter_map(RecordSnapshot::record)
            .filter(|r| r.agent_name != agent && r.status == RunStatus::Running)
            .map(|r| r.control_port)
            .collect())
    }

    fn open_log(&self, agent: &str) -> AgentflowResult<(Stdio, Stdio)> {
        let path = self.log_path(agent);
        let write_error = |e: std::io::Error| AgentflowError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_error)?;
        let err_log = log.try_clone().map_err(write_error)?;
        Ok((Stdio::from(log), Stdio::from(err_log)))
    }

    /// SIGTERM, grace period, SIGKILL for processes found by the probe
    async fn terminate(&self, record: &RunRecord, targets: &StopTargets) -> AgentflowResult<()> {
        signal_targets(targets, Signal::Terminate);
        if wait_until_dead(&targets.processes, self.worker.grace_period()).await {
            return Ok(());
        }

        warn!(agent = %record.agent_name, pid = record.pid, "grace period elapsed; killing");
        signal_targets(targets, Signal::Kill);
        if wait_until_dead(&targets.processes, KILL_WAIT).await {
            return Ok(());
        }

        Err(AgentflowError::StopFailed {
            agent: record.agent_name.clone(),
            pid: record.pid,
            reason: "process survived SIGKILL".to_string(),
        })
    }

    /// Stop a worker this process owns, reaping it
    async fn terminate_child(&self, handle: &mut AgentHandle) {
        let targets = StopTargets {
            processes: vec![handle.pid],
            groups: vec![handle.pid],
        };

        signal_targets(&targets, Signal::Terminate);
        if tokio::time::timeout(self.worker.grace_period(), handle.child.wait())
            .await
            .is_ok()
        {
            return;
        }

        signal_targets(&targets, Signal::Kill);
        if let Err(e) = handle.child.kill().await {
            debug!(agent = %handle.agent_name, error = %e, "kill after grace period failed");
        }
    }
}

fn signal_targets(targets: &StopTargets, signal: Signal) {
    for &group in &targets.groups {
        if let Err(e) = os::send_group_signal(group, signal) {
            debug!(pgid = group, ?signal, error = %e, "group signal failed");
        }
    }
    for &pid in &targets.processes {
        if let Err(e) = os::send_signal(pid, signal) {
            debug!(pid, ?signal, error = %e, "signal failed");
        }
    }
}

async fn wait_until_dead(pids: &[u32], within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if !pids.iter().any(|&pid| os::process_alive(pid)) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

fn write_file(path: &Path, contents: &[u8]) -> AgentflowResult<()> {
    let write_error = |e: std::io::Error| AgentflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(path, contents).map_err(write_error)
}

/// Replace `{name}` placeholders in a worker argument
fn substitute(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_placeholders() {
        let vars = [
            ("port", "3285".to_string()),
            ("prompt_file", "/tmp/qa.md".to_string()),
        ];

        assert_eq!(substitute("--port={port}", &vars), "--port=3285");
        assert_eq!(substitute("@{prompt_file}", &vars), "@/tmp/qa.md");
        assert_eq!(substitute("{unknown}", &vars), "{unknown}");
    }

    #[test]
    fn test_agent_exit_success() {
        let done = AgentExit {
            status: RunStatus::Completed,
            error: None,
        };
        let stopped = AgentExit {
            status: RunStatus::Stopped,
            error: Some("stopped before completion".into()),
        };

        assert!(done.succeeded());
        assert!(!stopped.succeeded());
    }
}
