// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! End-to-end pipeline runs with `sh` standing in for the worker runtime

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, SystemTime};

use agentflow::pipeline::{
    AgentOutcome, AgentSet, FailurePolicy, PipelineEvent, PipelineExecutor, RunMode, RunOptions,
};
use agentflow::state::RunStatus;
use agentflow::Orchestrator;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Writes the agent name to its output; `security` fails when `FAIL_SECURITY` is set
const WORKER_SCRIPT: &str = r#"if [ -n "$FAIL_SECURITY" ] && [ "$AGENTFLOW_AGENT" = security ]; then exit 3; fi; printf '%s\n' "$AGENTFLOW_AGENT" > "$AGENTFLOW_OUTPUT""#;

/// Fails if another agent is inside the critical section at the same time
const EXCLUSIVE_SCRIPT: &str = r#"mkdir busy || exit 9; sleep 0.2; rmdir busy; printf '%s\n' "$AGENTFLOW_AGENT" > "$AGENTFLOW_OUTPUT""#;

fn agent_set(fail_security: bool) -> AgentSet {
    let env = if fail_security {
        "  env:\n    FAIL_SECURITY: \"1\"\n"
    } else {
        ""
    };
    sdlc_set(WORKER_SCRIPT, env)
}

/// The five-agent example DAG run by `script`
fn sdlc_set(script: &str, env: &str) -> AgentSet {
    let yaml = format!(
        r#"
name: sdlc
worker:
  command: sh
  args: ["-c", {script}]
  ports: {{ start: 0, end: 0 }}
  poll_interval_ms: 20
  grace_period_secs: 1
{env}agents:
  - name: architect
    output: architecture.md
  - name: qa
    output: qa.md
    depends_on: [architect]
  - name: security
    output: security.md
    depends_on: [architect]
  - name: implementer
    output: implementation.md
    depends_on: [architect, security]
  - name: verifier
    output: verification.md
    depends_on: [implementer, qa]
"#,
        script = serde_json::to_string(script).unwrap(),
        env = env,
    );
    AgentSet::from_yaml(&yaml).unwrap()
}

fn orchestrator(dir: &TempDir, set: AgentSet) -> Orchestrator {
    Orchestrator::open(set, dir.path().to_path_buf(), Some(dir.path().join("state"))).unwrap()
}

/// A PRD older than anything the run will write
fn write_prd(dir: &Path) -> std::path::PathBuf {
    let prd = dir.join("prd.md");
    std::fs::write(&prd, "# Product\n").unwrap();
    let file = std::fs::File::options().write(true).open(&prd).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();
    prd
}

fn options(dir: &TempDir, mode: RunMode) -> RunOptions {
    let mut options = RunOptions::new(write_prd(dir.path()));
    options.output_dir = dir.path().join("output");
    options.mode = mode;
    options.timeout = Some(Duration::from_secs(30));
    options
}

#[test]
fn test_example_graph_levels() {
    let plan = PipelineExecutor::plan(&agent_set(false), &RunOptions::new("prd.md")).unwrap();
    let levels: Vec<Vec<String>> = plan.scheduled.into_iter().map(|l| l.agents).collect();

    assert_eq!(
        levels,
        vec![
            vec!["architect".to_string()],
            vec!["qa".to_string(), "security".to_string()],
            vec!["implementer".to_string()],
            vec!["verifier".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_full_run_writes_every_output() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(false));
    let options = options(&dir, RunMode::Normal);

    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options)
        .await
        .unwrap();

    assert!(summary.is_success(), "{:?}", summary.results);
    assert_eq!(summary.succeeded, 5);
    assert!(summary.total_duration > Duration::ZERO);

    let content = std::fs::read_to_string(dir.path().join("output/verification.md")).unwrap();
    assert_eq!(content.trim(), "verifier");
}

#[tokio::test]
async fn test_resume_after_success_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(false));

    let first = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Normal))
        .await
        .unwrap();
    assert!(first.is_success());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let resume = options(&dir, RunMode::Resume);
    let second = orch
        .executor()
        .with_events(tx)
        .execute(orch.agent_set(), orch.base_dir(), &resume)
        .await
        .unwrap();

    assert!(second.is_success());
    assert_eq!(second.skipped, 5);
    assert_eq!(second.total_duration, Duration::ZERO);

    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, PipelineEvent::AgentStarted { .. }),
            "unexpected spawn: {:?}",
            event
        );
    }
}

#[tokio::test]
async fn test_force_reruns_fresh_outputs() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(false));

    orch.executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Normal))
        .await
        .unwrap();

    let forced = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Force))
        .await
        .unwrap();

    assert_eq!(forced.succeeded, 5);
    assert_eq!(forced.skipped, 0);
}

#[tokio::test]
async fn test_failure_blocks_only_dependents() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(true));

    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Normal))
        .await
        .unwrap();

    let outcome = |agent: &str| summary.result(agent).unwrap().outcome;
    assert_eq!(outcome("architect"), AgentOutcome::Succeeded);
    assert_eq!(outcome("qa"), AgentOutcome::Succeeded);
    assert_eq!(outcome("security"), AgentOutcome::Failed);
    assert_eq!(outcome("implementer"), AgentOutcome::Blocked);
    assert_eq!(outcome("verifier"), AgentOutcome::Blocked);
    assert!(!summary.is_success());

    let error = summary.result("security").unwrap().error_detail.clone().unwrap();
    assert!(error.contains("3"), "{}", error);
    assert!(!dir.path().join("output/implementation.md").exists());
}

#[tokio::test]
async fn test_cycle_is_rejected_before_spawning() {
    let dir = TempDir::new().unwrap();
    let set = AgentSet::from_yaml(
        r#"
name: loop
worker:
  command: sh
  args: ["-c", "touch \"$AGENTFLOW_OUTPUT\""]
  ports: { start: 0, end: 0 }
agents:
  - name: a
    output: a.md
    depends_on: [b]
  - name: b
    output: b.md
    depends_on: [a]
"#,
    )
    .unwrap();
    let orch = orchestrator(&dir, set);

    let err = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Normal))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(!dir.path().join("output").join("a.md").exists());
    let tracked = orch.supervisor().store().list().await.unwrap();
    assert!(tracked.is_empty());
}

#[tokio::test]
async fn test_selected_agent_uses_existing_dependency_output() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(false));

    let mut options = options(&dir, RunMode::Normal);
    options.agents = vec!["qa".to_string()];
    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options)
        .await
        .unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(!dir.path().join("output/architecture.md").exists());
}

#[tokio::test]
async fn test_sequential_run_never_overlaps_agents() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, sdlc_set(EXCLUSIVE_SCRIPT, ""));
    let mut options = options(&dir, RunMode::Normal);
    options.sequential = true;

    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options)
        .await
        .unwrap();

    assert!(summary.is_success(), "{:?}", summary.results);
    assert_eq!(summary.succeeded, 5);
    assert!(summary.total_duration >= Duration::from_millis(800));
}

#[tokio::test]
async fn test_abort_blocks_agents_outside_the_failed_branch() {
    let dir = TempDir::new().unwrap();
    let set = AgentSet::from_yaml(&format!(
        r#"
name: abort
worker:
  command: sh
  args: ["-c", {script}]
  ports: {{ start: 0, end: 0 }}
  poll_interval_ms: 20
  env:
    FAIL_SECURITY: "1"
agents:
  - name: architect
    output: architecture.md
  - name: qa
    output: qa.md
    depends_on: [architect]
  - name: security
    output: security.md
    depends_on: [architect]
  - name: docs
    output: docs.md
    depends_on: [qa]
"#,
        script = serde_json::to_string(WORKER_SCRIPT).unwrap(),
    ))
    .unwrap();
    let orch = orchestrator(&dir, set);
    let mut options = options(&dir, RunMode::Normal);
    options.failure_policy = FailurePolicy::Abort;

    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options)
        .await
        .unwrap();

    assert_eq!(summary.result("security").unwrap().outcome, AgentOutcome::Failed);
    assert_eq!(summary.result("qa").unwrap().outcome, AgentOutcome::Succeeded);
    let docs = summary.result("docs").unwrap();
    assert_eq!(docs.outcome, AgentOutcome::Blocked);
    assert_eq!(
        docs.error_detail.as_deref(),
        Some("pipeline aborted after a failure")
    );
    assert!(!dir.path().join("output/docs.md").exists());
}

#[tokio::test]
async fn test_sequential_abort_blocks_rest_of_level() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, agent_set(true));
    let mut options = options(&dir, RunMode::Normal);
    options.sequential = true;
    options.failure_policy = FailurePolicy::Abort;

    let summary = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options)
        .await
        .unwrap();

    let outcome = |agent: &str| summary.result(agent).unwrap().outcome;
    assert_eq!(outcome("architect"), AgentOutcome::Succeeded);
    assert_eq!(outcome("qa"), AgentOutcome::Succeeded);
    assert_eq!(outcome("security"), AgentOutcome::Failed);
    assert_eq!(outcome("implementer"), AgentOutcome::Blocked);
    assert_eq!(outcome("verifier"), AgentOutcome::Blocked);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.blocked, 2);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancellation_stops_running_agents() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, sdlc_set("exec sleep 60", ""));
    let options = options(&dir, RunMode::Normal);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = orch.executor().with_events(tx);
    let cancel = orch.cancellation().clone();
    let canceller = async move {
        while let Some(event) = rx.recv().await {
            if matches!(event, PipelineEvent::AgentStarted { .. }) {
                cancel.cancel();
                break;
            }
        }
    };

    let (summary, ()) = tokio::join!(
        executor.execute(orch.agent_set(), orch.base_dir(), &options),
        canceller
    );
    let summary = summary.unwrap();

    assert!(summary.cancelled);
    assert!(!summary.is_success());
    let architect = summary.result("architect").unwrap();
    assert_eq!(architect.outcome, AgentOutcome::Failed);
    assert_eq!(architect.error_detail.as_deref(), Some("cancelled"));
    assert_eq!(summary.blocked, 4);

    let supervisor = orch.supervisor();
    assert!(!supervisor.is_alive("architect").await.unwrap());
    let record = supervisor.store().get("architect").await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_resume_reruns_dependents_of_agent_without_output() {
    let dir = TempDir::new().unwrap();
    let set = AgentSet::from_yaml(&format!(
        r#"
name: outputless
worker:
  command: sh
  args: ["-c", {script}]
  ports: {{ start: 0, end: 0 }}
  poll_interval_ms: 20
agents:
  - name: indexer
  - name: report
    output: report.md
    depends_on: [indexer]
"#,
        script = serde_json::to_string(
            r#"if [ -n "$AGENTFLOW_OUTPUT" ]; then printf '%s\n' "$AGENTFLOW_AGENT" > "$AGENTFLOW_OUTPUT"; fi"#
        )
        .unwrap(),
    ))
    .unwrap();
    let orch = orchestrator(&dir, set);

    let first = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Normal))
        .await
        .unwrap();
    assert!(first.is_success(), "{:?}", first.results);

    let second = orch
        .executor()
        .execute(orch.agent_set(), orch.base_dir(), &options(&dir, RunMode::Resume))
        .await
        .unwrap();

    assert_eq!(second.result("indexer").unwrap().outcome, AgentOutcome::Succeeded);
    assert_eq!(second.result("report").unwrap().outcome, AgentOutcome::Succeeded);
    assert_eq!(second.skipped, 0);
}
