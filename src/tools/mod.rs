// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Orchestration tools
//!
//! The operations exposed to remote callers, with their wire shapes.
//! [`router::ToolRouter`] dispatches JSON-RPC requests onto them.

pub mod router;

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::{AgentSet, PipelineExecutor, PipelineRunResult, Persona, RunOptions};
use crate::prompt::{InstructionRenderer, TemplateRenderer};
use crate::state::{FilesystemStateStore, RecordSnapshot, RunStatus};
use crate::supervisor::{PortProbe, ProcessSupervisor, StopOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Parameters and results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RunAgentParams {
    pub prd_path: PathBuf,
    pub agent_name: String,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub agent: String,
    pub output_path: String,
    /// Seconds
    pub duration: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PipelineRunResult> for AgentRunResult {
    fn from(result: &PipelineRunResult) -> Self {
        Self {
            agent: result.agent_name.clone(),
            output_path: result
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            duration: result.duration.as_secs_f64(),
            success: result.success,
            error: result.error_detail.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunPipelineParams {
    pub prd_path: PathBuf,
    /// A list of names or one comma-separated string
    #[serde(default, deserialize_with = "agent_list")]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub sequential: Option<bool>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPipelineResult {
    pub results: Vec<AgentRunResult>,
    pub total_agents: usize,
    pub successful: usize,
    pub failed: usize,
    /// Seconds from first spawn to last terminal state
    pub total_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub output: Option<String>,
    pub depends_on: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListAgentsResult {
    pub agents: Vec<AgentInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetStatusParams {
    #[serde(default)]
    pub agent_name: Option<String>,
}

/// Reported liveness of a tracked agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Running,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    /// `None` when the record is unreadable
    pub port: Option<u16>,
    pub status: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetStatusResult {
    pub agents: Vec<AgentStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageParams {
    pub agent_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopAgentsParams {
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAgentsResult {
    pub stopped: Vec<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn agent_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::List(list)) => Some(list),
        Some(Raw::Csv(csv)) => Some(RunOptions::parse_agent_list(&csv)),
        None => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Implements the orchestration tools over one agent set
pub struct Orchestrator {
    set: AgentSet,
    base_dir: PathBuf,
    supervisor: Arc<ProcessSupervisor>,
    renderer: Arc<dyn InstructionRenderer>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        set: AgentSet,
        base_dir: PathBuf,
        supervisor: Arc<ProcessSupervisor>,
        renderer: Arc<dyn InstructionRenderer>,
    ) -> Self {
        Self {
            set,
            base_dir,
            supervisor,
            renderer,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the filesystem store, port probe and template renderer
    ///
    /// `state_dir` overrides the directory configured in the agent set.
    pub fn open(
        set: AgentSet,
        base_dir: PathBuf,
        state_dir: Option<PathBuf>,
    ) -> AgentflowResult<Self> {
        let supervisor = Arc::new(open_supervisor(&set, &base_dir, state_dir)?);
        let renderer = Arc::new(TemplateRenderer::new(base_dir.join(&set.prompts_dir)));
        Ok(Self::new(set, base_dir, supervisor, renderer))
    }

    pub fn agent_set(&self) -> &AgentSet {
        &self.set
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Token cancelling every run started through this orchestrator
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Executor sharing this orchestrator's supervisor and renderer
    pub fn executor(&self) -> PipelineExecutor {
        PipelineExecutor::new(Arc::clone(&self.supervisor), Arc::clone(&self.renderer))
            .with_cancellation(self.cancel.child_token())
    }

    /// Run one agent
    pub async fn run_agent(&self, params: RunAgentParams) -> AgentflowResult<AgentRunResult> {
        let mut options = self.options(
            params.prd_path,
            params.output_dir,
            params.persona.as_deref(),
            params.verbose,
        )?;
        options.agents = vec![params.agent_name.clone()];

        let summary = self.executor().execute(&self.set, &self.base_dir, &options).await?;
        summary
            .result(&params.agent_name)
            .map(AgentRunResult::from)
            .ok_or(AgentflowError::AgentNotFound {
                agent: params.agent_name,
            })
    }

    /// Run the pipeline, optionally restricted to some agents
    pub async fn run_pipeline(&self, params: RunPipelineParams) -> AgentflowResult<RunPipelineResult> {
        let mut options = self.options(
            params.prd_path,
            params.output_dir,
            params.persona.as_deref(),
            params.verbose,
        )?;
        options.agents = params.agents.unwrap_or_default();
        options.sequential = params.sequential.unwrap_or(false);

        let summary = self.executor().execute(&self.set, &self.base_dir, &options).await?;
        let results: Vec<AgentRunResult> = summary.results.iter().map(AgentRunResult::from).collect();
        let successful = results.iter().filter(|r| r.success).count();

        Ok(RunPipelineResult {
            total_agents: results.len(),
            successful,
            failed: results.len() - successful,
            total_duration: summary.total_duration.as_secs_f64(),
            results,
        })
    }

    /// Describe the defined agents
    pub fn list_agents(&self) -> ListAgentsResult {
        ListAgentsResult {
            agents: self
                .set
                .agents
                .iter()
                .map(|a| AgentInfo {
                    name: a.name.clone(),
                    output: a.output.as_ref().map(|o| o.display().to_string()),
                    depends_on: a.depends_on.clone(),
                    description: a.description.clone(),
                })
                .collect(),
        }
    }

    /// Liveness of tracked agents, reconciled against the process table
    pub async fn get_status(&self, params: GetStatusParams) -> AgentflowResult<GetStatusResult> {
        let wanted = params.agent_name.filter(|n| !n.is_empty());
        let snapshots = self.supervisor.store().list().await?;

        let agents = snapshots
            .into_iter()
            .filter(|s| wanted.as_deref().map_or(true, |w| s.agent_name() == w))
            .map(|snapshot| match snapshot {
                RecordSnapshot::Tracked(record) => {
                    let running = record.status == RunStatus::Running
                        && self.supervisor.record_alive(&record);
                    AgentStatus {
                        name: record.agent_name,
                        port: Some(record.control_port),
                        status: if running {
                            AgentState::Running
                        } else {
                            AgentState::Stable
                        },
                        started_at: Some(record.started_at.to_rfc3339()),
                        error: record.error,
                    }
                }
                RecordSnapshot::Unreadable { agent_name, error } => AgentStatus {
                    name: agent_name,
                    port: None,
                    status: AgentState::Stable,
                    started_at: None,
                    error: Some(format!("status unknown: {}", error)),
                },
            })
            .collect();

        Ok(GetStatusResult { agents })
    }

    /// Deliver guidance to a running agent
    pub async fn send_message(&self, params: SendMessageParams) -> SendMessageResult {
        match self
            .supervisor
            .send_message(&params.agent_name, &params.message)
            .await
        {
            Ok(()) => SendMessageResult {
                success: true,
                error: None,
            },
            Err(e) => SendMessageResult {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Stop one agent, or every tracked agent one by one
    pub async fn stop_agents(&self, params: StopAgentsParams) -> AgentflowResult<StopAgentsResult> {
        let targets = match params.agent_name.filter(|n| !n.is_empty()) {
            Some(name) => vec![name],
            None => self
                .supervisor
                .store()
                .list()
                .await?
                .iter()
                .map(|s| s.agent_name().to_string())
                .collect(),
        };

        let mut stopped = Vec::new();
        let mut errors = Vec::new();
        for agent in targets {
            match self.supervisor.stop(&agent).await {
                Ok(StopOutcome::NotTracked) => debug!(agent = %agent, "not tracked"),
                Ok(_) => stopped.push(agent),
                Err(e) => {
                    warn!(agent = %agent, error = %e, "stop failed");
                    errors.push(format!("{}: {}", agent, e));
                }
            }
        }

        Ok(StopAgentsResult {
            stopped,
            success: errors.is_empty(),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        })
    }

    fn options(
        &self,
        prd_path: PathBuf,
        output_dir: Option<PathBuf>,
        persona: Option<&str>,
        verbose: Option<bool>,
    ) -> AgentflowResult<RunOptions> {
        let mut options = RunOptions::new(prd_path);
        if let Some(dir) = output_dir {
            options.output_dir = dir;
        }
        if let Some(persona) = persona {
            options.persona = persona.parse::<Persona>()?;
        }
        options.verbose = verbose.unwrap_or(false);
        Ok(options)
    }
}

/// Build a supervisor over the filesystem store
pub fn open_supervisor(
    set: &AgentSet,
    base_dir: &Path,
    state_dir: Option<PathBuf>,
) -> AgentflowResult<ProcessSupervisor> {
    let state_dir = state_dir
        .map(|d| base_dir.join(d))
        .unwrap_or_else(|| set.state.resolve(base_dir));
    let probe = Arc::new(PortProbe::new());
    let store = FilesystemStateStore::new(state_dir.clone(), probe.clone())?;
    debug!(state_dir = %state_dir.display(), "state store opened");

    Ok(ProcessSupervisor::new(
        Arc::new(store),
        probe,
        set.worker.clone(),
        state_dir,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RunRecord, StateStore};
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let set = AgentSet::from_yaml(
            r#"
name: tools
agents:
  - name: architect
    output: architecture.md
    description: System architecture
  - name: qa
    output: qa.md
    depends_on: [architect]
"#,
        )
        .unwrap();
        Orchestrator::open(
            set,
            dir.path().to_path_buf(),
            Some(dir.path().join("state")),
        )
        .unwrap()
    }

    #[test]
    fn test_list_agents_shape() {
        let dir = TempDir::new().unwrap();
        let json = serde_json::to_value(orchestrator(&dir).list_agents()).unwrap();

        assert_eq!(json["agents"][0]["name"], "architect");
        assert_eq!(json["agents"][0]["output"], "architecture.md");
        assert_eq!(json["agents"][0]["description"], "System architecture");
        assert_eq!(json["agents"][1]["depends_on"][0], "architect");
        assert!(json["agents"][1]["description"].is_null());
    }

    #[test]
    fn test_run_pipeline_params_accept_csv_agents() {
        let params: RunPipelineParams =
            serde_json::from_str(r#"{"prd_path":"prd.md","agents":"architect, qa"}"#).unwrap();
        assert_eq!(params.agents, Some(vec!["architect".into(), "qa".into()]));

        let params: RunPipelineParams =
            serde_json::from_str(r#"{"prd_path":"prd.md","agents":["qa"]}"#).unwrap();
        assert_eq!(params.agents, Some(vec!["qa".into()]));

        let params: RunPipelineParams = serde_json::from_str(r#"{"prd_path":"prd.md"}"#).unwrap();
        assert_eq!(params.agents, None);
    }

    #[tokio::test]
    async fn test_get_status_reports_dead_agent_as_stable() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let mut live = RunRecord::running("architect", std::process::id(), 0);
        live.started_at = chrono::Utc::now();
        orch.supervisor().store().put(&live).await.unwrap();
        orch.supervisor()
            .store()
            .put(&RunRecord::running("qa", u32::MAX - 1, 3290))
            .await
            .unwrap();

        let status = orch.get_status(GetStatusParams::default()).await.unwrap();
        assert_eq!(status.agents.len(), 2);
        assert_eq!(status.agents[0].status, AgentState::Running);
        assert_eq!(status.agents[1].status, AgentState::Stable);

        let only_qa = orch
            .get_status(GetStatusParams {
                agent_name: Some("qa".into()),
            })
            .await
            .unwrap();
        assert_eq!(only_qa.agents.len(), 1);
        assert_eq!(only_qa.agents[0].port, Some(3290));
    }

    #[tokio::test]
    async fn test_send_message_to_untracked_agent_fails() {
        let dir = TempDir::new().unwrap();
        let result = orchestrator(&dir)
            .send_message(SendMessageParams {
                agent_name: "qa".into(),
                message: "hello".into(),
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("agent not running: qa"));
    }

    #[tokio::test]
    async fn test_stop_all_with_nothing_tracked() {
        let dir = TempDir::new().unwrap();
        let result = orchestrator(&dir)
            .stop_agents(StopAgentsParams::default())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.stopped.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_persona_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(&dir)
            .run_pipeline(RunPipelineParams {
                prd_path: "prd.md".into(),
                agents: None,
                output_dir: None,
                persona: Some("reckless".into()),
                sequential: None,
                verbose: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_fatal());
    }
}
