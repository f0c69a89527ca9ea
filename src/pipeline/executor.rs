// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Pipeline executor
//!
//! Runs the agents of a plan level by level. Members of a level run
//! concurrently unless sequential mode is requested. A failed agent blocks
//! only the agents that depend on it (or, under [`FailurePolicy::Abort`],
//! everything not yet started); the run always ends with a summary.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::{
    AgentSet, DagBuilder, ExecutionPlan, FailurePolicy, FreshnessEvaluator, PipelineValidator,
    RunMode, RunOptions,
};
use crate::prompt::{InstructionContext, InstructionRenderer};
use crate::supervisor::{AgentExit, ProcessSupervisor, SpawnRequest};

/// Final state of one agent within an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    Succeeded,
    /// Skipped because its output was fresh
    Skipped,
    Failed,
    /// Never spawned because a dependency failed
    Blocked,
}

impl AgentOutcome {
    /// Whether dependents may proceed
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Per-agent result of an invocation
#[derive(Debug, Clone)]
pub struct PipelineRunResult {
    pub agent_name: String,
    pub output_path: Option<PathBuf>,
    pub duration: Duration,
    pub success: bool,
    pub error_detail: Option<String>,
    pub outcome: AgentOutcome,
}

impl PipelineRunResult {
    fn new(agent: &str, output_path: Option<PathBuf>, outcome: AgentOutcome) -> Self {
        Self {
            agent_name: agent.to_string(),
            output_path,
            duration: Duration::ZERO,
            success: outcome.satisfies_dependents(),
            error_detail: None,
            outcome,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_detail = Some(error.into());
        self
    }
}

/// Aggregated result of an invocation
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    /// Results in plan order
    pub results: Vec<PipelineRunResult>,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    /// First spawn to last terminal state; zero if nothing was spawned
    pub total_duration: Duration,
    pub cancelled: bool,
}

impl PipelineSummary {
    fn from_results(results: Vec<PipelineRunResult>, total_duration: Duration, cancelled: bool) -> Self {
        let count = |outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            succeeded: count(AgentOutcome::Succeeded),
            skipped: count(AgentOutcome::Skipped),
            failed: count(AgentOutcome::Failed),
            blocked: count(AgentOutcome::Blocked),
            total_duration,
            cancelled,
            results,
        }
    }

    /// Whether every scheduled agent succeeded or was skipped
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.blocked == 0
    }

    /// Result for one agent
    pub fn result(&self, agent: &str) -> Option<&PipelineRunResult> {
        self.results.iter().find(|r| r.agent_name == agent)
    }
}

/// Progress notifications emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    LevelStarted { index: usize, agents: Vec<String> },
    AgentSkipped { agent: String },
    AgentStarted { agent: String, pid: u32, port: u16 },
    AgentFinished { result: PipelineRunResult },
    AgentBlocked { agent: String, reason: String },
    Cancelled,
}

/// One agent ready to spawn
struct Job {
    position: usize,
    request: SpawnRequest,
}

/// What a job task reports back
struct JobReport {
    position: usize,
    agent: String,
    output_path: Option<PathBuf>,
    started: Option<Instant>,
    finished: Instant,
    exit: Result<AgentExit, String>,
}

/// Pipeline executor
pub struct PipelineExecutor {
    supervisor: Arc<ProcessSupervisor>,
    renderer: Arc<dyn InstructionRenderer>,
    events: Option<UnboundedSender<PipelineEvent>>,
    cancel: CancellationToken,
}

impl PipelineExecutor {
    pub fn new(supervisor: Arc<ProcessSupervisor>, renderer: Arc<dyn InstructionRenderer>) -> Self {
        Self {
            supervisor,
            renderer,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send progress events to `sender`
    pub fn with_events(mut self, sender: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Cancel the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Validate the set and compute the plan for `options`
    ///
    /// Every error here is a configuration error; nothing has been spawned.
    pub fn plan(set: &AgentSet, options: &RunOptions) -> AgentflowResult<ExecutionPlan> {
        Self::build_plan(set, options).map(|(_, plan)| plan)
    }

    fn build_plan(set: &AgentSet, options: &RunOptions) -> AgentflowResult<(DagBuilder, ExecutionPlan)> {
        PipelineValidator::ensure_valid(set)?;
        let dag = DagBuilder::build(set)?;
        let plan = dag.plan(&options.agents)?;
        Ok((dag, plan))
    }

    /// Run the pipeline
    ///
    /// Fails only on configuration errors. Per-agent failures are part of
    /// the returned summary.
    pub async fn execute(
        &self,
        set: &AgentSet,
        base_dir: &Path,
        options: &RunOptions,
    ) -> AgentflowResult<PipelineSummary> {
        let (dag, plan) = Self::build_plan(set, options)?;
        let root_inputs = resolve_root_inputs(set, base_dir, options)?;

        if options.dry_run {
            info!(agents = plan.scheduled_agents().len(), "dry run; nothing spawned");
            return Ok(PipelineSummary::default());
        }

        let output_dir = base_dir.join(&options.output_dir);
        let outputs: HashMap<&str, Option<PathBuf>> = set
            .agents
            .iter()
            .map(|a| (a.name.as_str(), a.output_in(&output_dir)))
            .collect();

        let mut results: Vec<PipelineRunResult> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();
        // Agents spawned by this invocation that succeeded
        let mut ran: HashSet<String> = HashSet::new();
        let mut aborted = false;
        let mut first_spawn: Option<Instant> = None;
        let mut last_terminal: Option<Instant> = None;

        info!(
            levels = plan.scheduled.len(),
            agents = plan.scheduled_agents().len(),
            mode = %options.mode,
            "starting pipeline"
        );

        for level in &plan.scheduled {
            debug!(level = level.index, agents = ?level.agents, "starting level");
            self.emit(PipelineEvent::LevelStarted {
                index: level.index,
                agents: level.agents.clone(),
            });

            let mut level_results: Vec<Option<PipelineRunResult>> = vec![None; level.agents.len()];
            let mut jobs = Vec::new();

            for (position, name) in level.agents.iter().enumerate() {
                let output = outputs.get(name.as_str()).cloned().flatten();

                if let Some(reason) = self.block_reason(&dag, name, &failed, aborted) {
                    self.emit(PipelineEvent::AgentBlocked {
                        agent: name.clone(),
                        reason: reason.clone(),
                    });
                    level_results[position] = Some(
                        PipelineRunResult::new(name, output, AgentOutcome::Blocked).with_error(reason),
                    );
                    continue;
                }

                let dependencies = dag.dependencies(name).unwrap_or_default();
                let dep_outputs: Vec<PathBuf> = dependencies
                    .iter()
                    .filter_map(|d| outputs.get(d.as_str()).cloned().flatten())
                    .collect();

                // A dependency without an output leaves no mtime to compare
                let upstream_ran = dependencies.iter().any(|d| ran.contains(d));
                if !upstream_ran
                    && !FreshnessEvaluator::should_run(
                        output.as_deref(),
                        options.mode,
                        &dep_outputs,
                        &root_inputs,
                    )
                {
                    debug!(agent = %name, "output is fresh; skipping");
                    self.emit(PipelineEvent::AgentSkipped { agent: name.clone() });
                    level_results[position] =
                        Some(PipelineRunResult::new(name, output, AgentOutcome::Skipped));
                    continue;
                }

                match self.prepare(set, name, &dependencies, &outputs, &output_dir, base_dir, options) {
                    Ok(request) => jobs.push(Job { position, request }),
                    Err(e) => {
                        warn!(agent = %name, error = %e, "cannot prepare agent");
                        let result = PipelineRunResult::new(name, output, AgentOutcome::Failed)
                            .with_error(e.to_string());
                        self.emit(PipelineEvent::AgentFinished { result: result.clone() });
                        level_results[position] = Some(result);
                    }
                }
            }

            let reports = if options.sequential {
                self.run_sequential(jobs, options, &mut aborted).await
            } else {
                self.run_concurrent(jobs, options).await
            };

            for report in reports {
                if let Some(started) = report.started {
                    first_spawn = Some(first_spawn.map_or(started, |t| t.min(started)));
                    last_terminal =
                        Some(last_terminal.map_or(report.finished, |t| t.max(report.finished)));
                }
                let position = report.position;
                let result = report_to_result(report);
                self.emit(PipelineEvent::AgentFinished { result: result.clone() });
                if result.outcome == AgentOutcome::Succeeded {
                    ran.insert(result.agent_name.clone());
                }
                level_results[position] = Some(result);
            }

            for result in level_results.into_iter().flatten() {
                if result.outcome == AgentOutcome::Failed {
                    failed.insert(result.agent_name.clone());
                    if options.failure_policy == FailurePolicy::Abort {
                        aborted = true;
                    }
                }
                results.push(result);
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            self.emit(PipelineEvent::Cancelled);
            self.block_unstarted(&plan, &outputs, &mut results);
            for (agent, outcome) in self.supervisor.stop_all().await {
                if let Err(e) = outcome {
                    warn!(agent = %agent, error = %e, "failed to stop agent after cancellation");
                }
            }
        }

        let total_duration = match (first_spawn, last_terminal) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        };
        let summary = PipelineSummary::from_results(results, total_duration, cancelled);
        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            blocked = summary.blocked,
            "pipeline finished"
        );
        Ok(summary)
    }

    fn block_reason(
        &self,
        dag: &DagBuilder,
        name: &str,
        failed: &HashSet<String>,
        aborted: bool,
    ) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("pipeline cancelled".to_string());
        }
        if aborted {
            return Some("pipeline aborted after a failure".to_string());
        }

        let mut upstream: Vec<String> = dag
            .transitive_dependencies(name)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| failed.contains(d))
            .collect();
        if upstream.is_empty() {
            return None;
        }
        upstream.sort();
        Some(format!("dependency failed: {}", upstream.join(", ")))
    }

    /// Render instructions and clear stale output for one agent
    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &self,
        set: &AgentSet,
        name: &str,
        dependencies: &[String],
        outputs: &HashMap<&str, Option<PathBuf>>,
        output_dir: &Path,
        base_dir: &Path,
        options: &RunOptions,
    ) -> AgentflowResult<SpawnRequest> {
        let agent = set
            .get_agent(name)
            .ok_or_else(|| AgentflowError::AgentNotFound {
                agent: name.to_string(),
            })?;
        let output_path = outputs.get(name).cloned().flatten();

        if let Some(ref output) = output_path {
            if options.mode == RunMode::Force && FreshnessEvaluator::clear_output(output)? {
                debug!(agent = %name, output = %output.display(), "removed stale output");
            }
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent).map_err(|e| AgentflowError::FileWriteError {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
            }
        }

        let prd_path = base_dir.join(&options.prd_path);
        let context = InstructionContext {
            agent,
            prd_path: &prd_path,
            output_path: output_path.as_deref(),
            output_dir,
            persona: options.persona,
            dependencies: dependencies
                .iter()
                .map(|d| (d.clone(), outputs.get(d.as_str()).cloned().flatten()))
                .collect(),
        };
        let instructions = self.renderer.render(&context)?;

        Ok(SpawnRequest {
            agent_name: name.to_string(),
            instructions,
            work_dir: base_dir.to_path_buf(),
            output_path,
        })
    }

    async fn run_concurrent(&self, jobs: Vec<Job>, options: &RunOptions) -> Vec<JobReport> {
        let mut tasks = JoinSet::new();
        let mut spawned = Vec::new();

        for job in jobs {
            spawned.push((
                job.position,
                job.request.agent_name.clone(),
                job.request.output_path.clone(),
            ));
            let span = info_span!("agent", agent = %job.request.agent_name);
            tasks.spawn(
                run_job(
                    Arc::clone(&self.supervisor),
                    job,
                    options.timeout,
                    self.cancel.clone(),
                    self.events.clone(),
                )
                .instrument(span),
            );
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "agent task panicked"),
            }
        }

        for (position, agent, output_path) in spawned {
            if !reports.iter().any(|r| r.position == position) {
                reports.push(JobReport {
                    position,
                    agent,
                    output_path,
                    started: None,
                    finished: Instant::now(),
                    exit: Err("agent task failed".to_string()),
                });
            }
        }

        reports.sort_by_key(|r| r.position);
        reports
    }

    async fn run_sequential(
        &self,
        jobs: Vec<Job>,
        options: &RunOptions,
        aborted: &mut bool,
    ) -> Vec<JobReport> {
        let mut reports = Vec::new();

        for job in jobs {
            if *aborted || self.cancel.is_cancelled() {
                let reason = if *aborted {
                    "pipeline aborted after a failure"
                } else {
                    "pipeline cancelled"
                };
                self.emit(PipelineEvent::AgentBlocked {
                    agent: job.request.agent_name.clone(),
                    reason: reason.to_string(),
                });
                reports.push(JobReport {
                    position: job.position,
                    agent: job.request.agent_name,
                    output_path: job.request.output_path,
                    started: None,
                    finished: Instant::now(),
                    exit: Err(format!("blocked: {}", reason)),
                });
                continue;
            }

            let span = info_span!("agent", agent = %job.request.agent_name);
            let report = run_job(
                Arc::clone(&self.supervisor),
                job,
                options.timeout,
                self.cancel.clone(),
                self.events.clone(),
            )
            .instrument(span)
            .await;

            if report.exit.as_ref().map_or(true, |e| !e.succeeded())
                && options.failure_policy == FailurePolicy::Abort
            {
                *aborted = true;
            }
            reports.push(report);
        }

        reports
    }

    /// Record every scheduled agent without a result as blocked
    fn block_unstarted(
        &self,
        plan: &ExecutionPlan,
        outputs: &HashMap<&str, Option<PathBuf>>,
        results: &mut Vec<PipelineRunResult>,
    ) {
        let seen: HashSet<String> = results.iter().map(|r| r.agent_name.clone()).collect();
        for name in plan.scheduled_agents() {
            if !seen.contains(name) {
                let output = outputs.get(name).cloned().flatten();
                results.push(
                    PipelineRunResult::new(name, output, AgentOutcome::Blocked)
                        .with_error("pipeline cancelled"),
                );
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(ref sender) = self.events {
            // A dropped receiver only means nobody is watching
            let _ = sender.send(event);
        }
    }
}

/// Spawn one agent and wait for its terminal state
async fn run_job(
    supervisor: Arc<ProcessSupervisor>,
    job: Job,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    events: Option<UnboundedSender<PipelineEvent>>,
) -> JobReport {
    let position = job.position;
    let agent = job.request.agent_name.clone();
    let output_path = job.request.output_path.clone();
    let report = |started: Option<Instant>, exit: Result<AgentExit, String>| JobReport {
        position,
        agent: agent.clone(),
        output_path: output_path.clone(),
        started,
        finished: Instant::now(),
        exit,
    };

    let started = Instant::now();
    let mut handle = match supervisor.spawn(job.request).await {
        Ok(handle) => handle,
        Err(e) => return report(None, Err(e.to_string())),
    };
    if let Some(ref events) = events {
        let _ = events.send(PipelineEvent::AgentStarted {
            agent: agent.clone(),
            pid: handle.pid(),
            port: handle.port(),
        });
    }

    let outcome = tokio::select! {
        outcome = supervisor.await_completion(&mut handle, timeout) => outcome,
        _ = cancel.cancelled() => {
            debug!(agent = %agent, "cancelled while running");
            return report(Some(started), Err("cancelled".to_string()));
        }
    };

    let exit = match outcome {
        Ok(outcome) => supervisor.finish(handle, outcome).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    report(Some(started), exit)
}

fn report_to_result(report: JobReport) -> PipelineRunResult {
    let duration = report
        .started
        .map(|s| report.finished.saturating_duration_since(s))
        .unwrap_or_default();

    let blocked = report
        .exit
        .as_ref()
        .err()
        .is_some_and(|e| e.starts_with("blocked: "));

    let (outcome, error) = match report.exit {
        Ok(exit) if exit.succeeded() => (AgentOutcome::Succeeded, None),
        Ok(exit) => (
            AgentOutcome::Failed,
            Some(exit.error.unwrap_or_else(|| format!("agent {}", exit.status))),
        ),
        Err(e) if blocked => (
            AgentOutcome::Blocked,
            Some(e.trim_start_matches("blocked: ").to_string()),
        ),
        Err(e) => (AgentOutcome::Failed, Some(e)),
    };

    let mut result = PipelineRunResult::new(&report.agent, report.output_path, outcome);
    result.duration = duration;
    result.error_detail = error;
    result
}

/// The PRD plus every file matched by the set's input patterns
fn resolve_root_inputs(
    set: &AgentSet,
    base_dir: &Path,
    options: &RunOptions,
) -> AgentflowResult<Vec<PathBuf>> {
    let mut inputs = vec![base_dir.join(&options.prd_path)];

    for pattern in &set.inputs {
        let full = base_dir.join(pattern);
        for entry in glob::glob(&full.to_string_lossy())? {
            match entry {
                Ok(path) => inputs.push(path),
                Err(e) => debug!(error = %e, "unreadable root input"),
            }
        }
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: AgentOutcome) -> PipelineRunResult {
        PipelineRunResult::new(name, None, outcome)
    }

    #[test]
    fn test_summary_counts() {
        let summary = PipelineSummary::from_results(
            vec![
                result("architect", AgentOutcome::Succeeded),
                result("qa", AgentOutcome::Skipped),
                result("security", AgentOutcome::Failed),
                result("implementer", AgentOutcome::Blocked),
            ],
            Duration::from_secs(3),
            false,
        );

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert!(!summary.is_success());
        assert!(summary.result("qa").unwrap().success);
    }

    #[test]
    fn test_blocked_report_maps_to_blocked_outcome() {
        let report = JobReport {
            position: 0,
            agent: "qa".into(),
            output_path: None,
            started: None,
            finished: Instant::now(),
            exit: Err("blocked: pipeline aborted after a failure".into()),
        };

        let result = report_to_result(report);
        assert_eq!(result.outcome, AgentOutcome::Blocked);
        assert_eq!(
            result.error_detail.as_deref(),
            Some("pipeline aborted after a failure")
        );
        assert_eq!(result.duration, Duration::ZERO);
    }

    #[test]
    fn test_build_plan_shares_one_graph() {
        let set = AgentSet::from_yaml(
            r#"
name: sdlc
agents:
  - name: architect
    output: architecture.md
  - name: qa
    output: qa.md
    depends_on: [architect]
"#,
        )
        .unwrap();

        let (dag, plan) =
            PipelineExecutor::build_plan(&set, &RunOptions::new("prd.md")).unwrap();
        assert_eq!(plan.scheduled.len(), 2);
        assert_eq!(dag.dependencies("qa").unwrap(), vec!["architect".to_string()]);
        assert_eq!(
            PipelineExecutor::plan(&set, &RunOptions::new("prd.md")).unwrap().scheduled.len(),
            2
        );
    }

    #[test]
    fn test_stopped_exit_is_failure() {
        let report = JobReport {
            position: 0,
            agent: "qa".into(),
            output_path: None,
            started: Some(Instant::now()),
            finished: Instant::now(),
            exit: Ok(AgentExit {
                status: crate::state::RunStatus::Stopped,
                error: Some("stopped before completion".into()),
            }),
        };

        let result = report_to_result(report);
        assert_eq!(result.outcome, AgentOutcome::Failed);
        assert!(!result.success);
    }
}
