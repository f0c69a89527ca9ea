// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Durable record of spawned agent processes
//!
//! The state store is shared by every agentflow process on the host, so a
//! `status` or `stop` issued from a second invocation sees the agents
//! started by the first. Records are keyed by agent name and every
//! operation touches exactly one record.

mod filesystem;
mod lock;

pub use filesystem::FilesystemStateStore;
pub use lock::StateLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::AgentflowResult;

/// Lifecycle status of a tracked agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    /// Whether the process is finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One spawned agent process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub agent_name: String,
    pub pid: u32,
    pub control_port: u16,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// A fresh `Running` record
    pub fn running(agent_name: &str, pid: u32, control_port: u16) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            pid,
            control_port,
            started_at: Utc::now(),
            status: RunStatus::Running,
            finished_at: None,
            output_path: None,
            error: None,
        }
    }

    /// Apply a status transition
    pub fn transition(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = status.is_terminal().then(Utc::now);
    }
}

/// A listed record, or the reason it could not be read
#[derive(Debug, Clone)]
pub enum RecordSnapshot {
    Tracked(RunRecord),
    Unreadable { agent_name: String, error: String },
}

impl RecordSnapshot {
    pub fn agent_name(&self) -> &str {
        match self {
            Self::Tracked(record) => &record.agent_name,
            Self::Unreadable { agent_name, .. } => agent_name,
        }
    }

    pub fn record(&self) -> Option<&RunRecord> {
        match self {
            Self::Tracked(record) => Some(record),
            Self::Unreadable { .. } => None,
        }
    }
}

/// Trait for state store implementations
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or replace the record for `record.agent_name`
    async fn put(&self, record: &RunRecord) -> AgentflowResult<()>;

    /// Get the stored record for an agent, as written
    async fn get(&self, agent: &str) -> AgentflowResult<Option<RunRecord>>;

    /// List every record, reconciling `Running` entries against liveness
    async fn list(&self) -> AgentflowResult<Vec<RecordSnapshot>>;

    /// Remove exactly one record; returns whether it existed
    async fn remove(&self, agent: &str) -> AgentflowResult<bool>;

    /// Move one record to a new status
    ///
    /// A `Stopped` record keeps its status against any other terminal
    /// transition; only `put` replaces it.
    async fn transition(
        &self,
        agent: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> AgentflowResult<Option<RunRecord>>;

    /// Take the spawn claim for an agent; held until dropped
    async fn claim(&self, agent: &str) -> AgentflowResult<StateLock>;
}
