// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Agent definition structures
//!
//! Defines the schema for .agentflow.yaml files and the per-run options
//! handed to the executor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AgentflowError, AgentflowResult};

/// Default definition file name
pub const DEFAULT_DEFINITION_FILE: &str = ".agentflow.yaml";

/// Agent set loaded from .agentflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSet {
    /// Definition version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Directory holding prompt templates, relative to the definition file
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Extra root inputs (glob patterns) considered by freshness checks
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Worker process configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// State store configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Agents, in declaration order
    pub agents: Vec<AgentDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

impl AgentSet {
    /// Load an agent set from a YAML or TOML file
    pub fn from_file(path: &Path) -> AgentflowResult<Self> {
        if !path.exists() {
            return Err(AgentflowError::DefinitionNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| AgentflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse an agent set from YAML
    pub fn from_yaml(yaml: &str) -> AgentflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse an agent set from TOML
    pub fn from_toml(source: &str) -> AgentflowResult<Self> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Serialize the agent set to YAML
    pub fn to_yaml(&self) -> AgentflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get an agent by name
    pub fn get_agent(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Get all agent names in declaration order
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }
}

/// A single agent: one worker process producing one declared output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentDefinition {
    /// Agent name (unique key)
    pub name: String,

    /// Output file, relative to the run's output directory
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Agents whose outputs this agent consumes
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Prompt template reference, relative to `prompts_dir`
    #[serde(default)]
    pub prompt: Option<PathBuf>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentDefinition {
    /// Create a definition with an output and dependencies
    pub fn new(name: &str, output: Option<&str>, depends_on: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            output: output.map(PathBuf::from),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            prompt: None,
            description: None,
        }
    }

    /// Resolve the declared output against an output directory
    pub fn output_in(&self, output_dir: &Path) -> Option<PathBuf> {
        self.output.as_ref().map(|o| output_dir.join(o))
    }
}

/// Worker process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable to start; resolved on PATH
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments; `{port}`, `{agent}`, `{prompt_file}`, `{output}` and
    /// `{work_dir}` are substituted per spawn
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Control port range
    #[serde(default)]
    pub ports: PortRange,

    /// Seconds between SIGTERM and SIGKILL
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Completion poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Terminate a worker once its declared output is complete
    #[serde(default = "default_true")]
    pub stop_on_output: bool,
}

fn default_command() -> String {
    "agentapi".to_string()
}

fn default_args() -> Vec<String> {
    ["server", "--port", "{port}", "--", "claude", "-p", "@{prompt_file}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_grace_period() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            env: HashMap::new(),
            ports: PortRange::default(),
            grace_period_secs: default_grace_period(),
            poll_interval_ms: default_poll_interval(),
            stop_on_output: true,
        }
    }
}

impl WorkerConfig {
    /// Grace period before a stop escalates to SIGKILL
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Interval between completion polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Half-open control port range; `start == 0` lets the OS choose
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 3284,
            end: 3384,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// State directory; defaults to the platform data directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl StateConfig {
    /// Resolve the state directory
    pub fn resolve(&self, base_dir: &Path) -> PathBuf {
        if let Some(ref dir) = self.directory {
            return base_dir.join(dir);
        }

        directories::ProjectDirs::from("dev", "agentflow", "agentflow")
            .map(|dirs| dirs.data_local_dir().join("state"))
            .unwrap_or_else(|| base_dir.join(".agentflow").join("state"))
    }
}

/// How freshness decides whether an agent runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every selected agent runs
    #[default]
    Normal,
    /// Skip agents whose output is newer than all of their inputs
    Resume,
    /// Every selected agent runs and stale outputs are deleted first
    Force,
}

impl FromStr for RunMode {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "resume" => Ok(Self::Resume),
            "force" => Ok(Self::Force),
            _ => Err(AgentflowError::invalid_option(
                "mode",
                s,
                &["normal", "resume", "force"],
            )),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Resume => write!(f, "resume"),
            Self::Force => write!(f, "force"),
        }
    }
}

/// Persona passed through to rendered instructions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Minimal,
    #[default]
    Balanced,
    Production,
}

impl FromStr for Persona {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "balanced" => Ok(Self::Balanced),
            "production" => Ok(Self::Production),
            _ => Err(AgentflowError::invalid_option(
                "persona",
                s,
                &["minimal", "balanced", "production"],
            )),
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Balanced => write!(f, "balanced"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// What happens to not-yet-started agents after a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Block only agents that (transitively) depend on the failed one
    #[default]
    BlockDependents,
    /// Block every agent that has not started yet
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block-dependents" | "block" => Ok(Self::BlockDependents),
            "abort" => Ok(Self::Abort),
            _ => Err(AgentflowError::invalid_option(
                "failure policy",
                s,
                &["block-dependents", "abort"],
            )),
        }
    }
}

/// Options for a single pipeline invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Product requirements document; always a root input
    pub prd_path: PathBuf,
    /// Agents to run (empty = all)
    pub agents: Vec<String>,
    /// Persona for rendered instructions
    pub persona: Persona,
    /// Freshness mode
    pub mode: RunMode,
    /// Run one agent at a time
    pub sequential: bool,
    /// Per-agent wall-clock bound (`None` = wait for completion)
    pub timeout: Option<Duration>,
    /// Directory outputs are written to
    pub output_dir: PathBuf,
    /// Failure propagation
    pub failure_policy: FailurePolicy,
    /// Only compute the plan
    pub dry_run: bool,
    /// Verbose output
    pub verbose: bool,
}

impl RunOptions {
    /// Options with defaults for everything but the PRD
    pub fn new(prd_path: impl Into<PathBuf>) -> Self {
        Self {
            prd_path: prd_path.into(),
            agents: Vec::new(),
            persona: Persona::default(),
            mode: RunMode::default(),
            sequential: false,
            timeout: None,
            output_dir: PathBuf::from("output"),
            failure_policy: FailurePolicy::default(),
            dry_run: false,
            verbose: false,
        }
    }

    /// Convert a timeout in seconds, where 0 means unbounded
    pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Parse a comma-separated agent list
    pub fn parse_agent_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}
