// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Error types
//!
//! Every failure is classified into one of four kinds. Configuration errors
//! are fatal for a whole invocation; process, state and IO errors are
//! reported against the single agent they concern.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for agentflow operations
pub type AgentflowResult<T> = Result<T, AgentflowError>;

/// Broad classification of an [`AgentflowError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid definition or options; nothing is spawned
    Config,
    /// Spawn, exit, port or stop failure for one agent
    Process,
    /// Corrupt or contended state record
    State,
    /// Filesystem failure for one agent
    Io,
}

/// Main error type for agentflow
#[derive(Error, Debug, Diagnostic)]
pub enum AgentflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Definition file not found: {path}")]
    #[diagnostic(
        code(agentflow::definition_not_found),
        help("Create .agentflow.yaml or pass a file with --file")
    )]
    DefinitionNotFound { path: PathBuf },

    #[error("Invalid agent definition: {reason}")]
    #[diagnostic(code(agentflow::invalid_definition))]
    InvalidDefinition {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("unknown dependency: agent '{agent}' depends on undefined agent '{dependency}'")]
    #[diagnostic(
        code(agentflow::unknown_dependency),
        help("Check that '{dependency}' is defined in your agent file")
    )]
    UnknownDependency { agent: String, dependency: String },

    #[error("dependency cycle involving: {}", .agents.join(", "))]
    #[diagnostic(
        code(agentflow::circular_dependency),
        help("Review depends_on entries to remove the cycle")
    )]
    CircularDependency { agents: Vec<String> },

    #[error("Agent '{agent}' is not defined")]
    #[diagnostic(code(agentflow::agent_not_found))]
    AgentNotFound { agent: String },

    #[error("Invalid value '{value}' for {option}")]
    #[diagnostic(code(agentflow::invalid_option), help("Expected one of: {expected}"))]
    InvalidOption {
        option: String,
        value: String,
        expected: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Worker runtime '{command}' not found")]
    #[diagnostic(code(agentflow::runtime_not_found))]
    RuntimeNotFound {
        command: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to start agent '{agent}': {reason}")]
    #[diagnostic(code(agentflow::spawn_failed))]
    SpawnFailed { agent: String, reason: String },

    #[error("No free control port for agent '{agent}' in {start}..{end}")]
    #[diagnostic(
        code(agentflow::port_unavailable),
        help("Stop idle agents or widen worker.ports in the agent file")
    )]
    PortUnavailable { agent: String, start: u16, end: u16 },

    #[error("Agent '{agent}' is already running (pid {pid})")]
    #[diagnostic(
        code(agentflow::already_running),
        help("Stop it first with 'agentflow stop {agent}'")
    )]
    AlreadyRunning { agent: String, pid: u32 },

    #[error("agent not running: {agent}")]
    #[diagnostic(code(agentflow::agent_not_running))]
    AgentNotRunning { agent: String },

    #[error("Failed to stop agent '{agent}' (pid {pid}): {reason}")]
    #[diagnostic(code(agentflow::stop_failed))]
    StopFailed { agent: String, pid: u32, reason: String },

    #[error("Control channel for agent '{agent}' failed: {reason}")]
    #[diagnostic(code(agentflow::control_channel))]
    ControlChannel { agent: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // State Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("State record '{path}' is unreadable: {reason}")]
    #[diagnostic(code(agentflow::state_corrupt))]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Timed out waiting for state lock '{path}'")]
    #[diagnostic(
        code(agentflow::lock_timeout),
        help("Another agentflow process is holding this record; retry shortly")
    )]
    LockTimeout { path: PathBuf },

    #[error("State store error: {message}")]
    #[diagnostic(code(agentflow::state_error))]
    State { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(agentflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(agentflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(agentflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(agentflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(agentflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(agentflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(agentflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for AgentflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for AgentflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for AgentflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for AgentflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for AgentflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl AgentflowError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DefinitionNotFound { .. }
            | Self::InvalidDefinition { .. }
            | Self::UnknownDependency { .. }
            | Self::CircularDependency { .. }
            | Self::AgentNotFound { .. }
            | Self::InvalidOption { .. }
            | Self::Yaml { .. }
            | Self::Toml { .. }
            | Self::GlobPattern { .. } => ErrorKind::Config,

            Self::RuntimeNotFound { .. }
            | Self::SpawnFailed { .. }
            | Self::PortUnavailable { .. }
            | Self::AlreadyRunning { .. }
            | Self::AgentNotRunning { .. }
            | Self::StopFailed { .. }
            | Self::ControlChannel { .. } => ErrorKind::Process,

            Self::StateCorrupt { .. } | Self::LockTimeout { .. } | Self::State { .. } => {
                ErrorKind::State
            }

            Self::FileReadError { .. }
            | Self::FileWriteError { .. }
            | Self::Io { .. }
            | Self::Json { .. } => ErrorKind::Io,
        }
    }

    /// Whether this error must abort the whole invocation
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Config
    }

    /// Create a runtime-not-found error with an installation hint
    pub fn runtime_not_found(command: &str) -> Self {
        let help = match command {
            "agentapi" => {
                Some("Install agentapi: https://github.com/coder/agentapi".to_string())
            }
            "claude" => Some("Install Claude Code: npm install -g @anthropic-ai/claude-code".to_string()),
            _ => Some(format!(
                "Install {} and ensure it's in your PATH, or set worker.command",
                command
            )),
        };

        Self::RuntimeNotFound {
            command: command.to_string(),
            help,
        }
    }

    /// Create an invalid-option error
    pub fn invalid_option(option: &str, value: &str, expected: &[&str]) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            value: value.to_string(),
            expected: expected.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_members() {
        let err = AgentflowError::CircularDependency {
            agents: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle involving: a, b, c");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_kinds() {
        let err = AgentflowError::AgentNotRunning { agent: "qa".into() };
        assert_eq!(err.kind(), ErrorKind::Process);
        assert!(err.to_string().contains("agent not running"));

        let err = AgentflowError::LockTimeout {
            path: PathBuf::from("x.lock"),
        };
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(!err.is_fatal());
    }
}
