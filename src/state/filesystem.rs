// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Filesystem-based state store
//!
//! One JSON file per agent under `records/`, replaced atomically through a
//! temporary file in the same directory. Read-modify-write of a record
//! happens under that agent's lock file in `locks/`.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{RecordSnapshot, RunRecord, RunStatus, StateLock, StateStore};
use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::is_valid_agent_name;
use crate::supervisor::LivenessProbe;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Error recorded when reconciliation finds a dead `Running` process
pub const UNEXPECTED_EXIT: &str = "process exited unexpectedly";

/// Filesystem-based state store
pub struct FilesystemStateStore {
    root: PathBuf,
    records_dir: PathBuf,
    locks_dir: PathBuf,
    probe: Arc<dyn LivenessProbe>,
    lock_timeout: Duration,
}

impl FilesystemStateStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn new(root: PathBuf, probe: Arc<dyn LivenessProbe>) -> AgentflowResult<Self> {
        let records_dir = root.join("records");
        let locks_dir = root.join("locks");

        for dir in [&records_dir, &locks_dir] {
            std::fs::create_dir_all(dir).map_err(|e| AgentflowError::State {
                message: format!("Failed to create state directory '{}': {}", dir.display(), e),
            })?;
        }

        Ok(Self {
            root,
            records_dir,
            locks_dir,
            probe,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Override how long lock acquisition waits
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// State directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_name(agent: &str) -> AgentflowResult<()> {
        if is_valid_agent_name(agent) {
            Ok(())
        } else {
            Err(AgentflowError::State {
                message: format!("'{}' is not a valid agent name", agent),
            })
        }
    }

    fn record_path(&self, agent: &str) -> AgentflowResult<PathBuf> {
        Self::check_name(agent)?;
        Ok(self.records_dir.join(format!("{}.json", agent)))
    }

    async fn lock(&self, agent: &str) -> AgentflowResult<StateLock> {
        Self::check_name(agent)?;
        StateLock::acquire(self.locks_dir.join(format!("{}.lock", agent)), self.lock_timeout).await
    }

    fn read_record(path: &Path) -> AgentflowResult<Option<RunRecord>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AgentflowError::StateCorrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| AgentflowError::StateCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn write_record(&self, record: &RunRecord) -> AgentflowResult<()> {
        let path = self.record_path(&record.agent_name)?;
        let json = serde_json::to_vec_pretty(record)?;

        let write_error = |e: std::io::Error| AgentflowError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        };

        // Same directory as the target so the rename stays on one filesystem
        let mut tmp = NamedTempFile::new_in(&self.records_dir).map_err(write_error)?;
        tmp.write_all(&json).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(&path).map_err(|e| write_error(e.error))?;

        debug!(agent = %record.agent_name, status = %record.status, "record written");
        Ok(())
    }

    /// Mark a dead `Running` record `Failed`, persisting best-effort
    async fn reconcile(&self, record: RunRecord) -> RunRecord {
        if record.status != RunStatus::Running || self.probe.is_alive(&record) {
            return record;
        }

        let mut reconciled = record.clone();
        reconciled.transition(RunStatus::Failed, Some(UNEXPECTED_EXIT.to_string()));

        match self.persist_reconciled(&record).await {
            Ok(Some(stored)) => stored,
            Ok(None) => reconciled,
            Err(e) => {
                warn!(agent = %record.agent_name, error = %e, "failed to persist reconciled status");
                reconciled
            }
        }
    }

    async fn persist_reconciled(&self, seen: &RunRecord) -> AgentflowResult<Option<RunRecord>> {
        let _lock = self.lock(&seen.agent_name).await?;
        let path = self.record_path(&seen.agent_name)?;

        // Another process may have replaced the record in the meantime
        let Some(mut current) = Self::read_record(&path)? else {
            return Ok(None);
        };
        if current.status != RunStatus::Running
            || current.pid != seen.pid
            || current.started_at != seen.started_at
        {
            return Ok(Some(current));
        }

        current.transition(RunStatus::Failed, Some(UNEXPECTED_EXIT.to_string()));
        self.write_record(&current)?;
        debug!(agent = %current.agent_name, pid = current.pid, "reconciled dead process");
        Ok(Some(current))
    }

    fn record_files(&self) -> AgentflowResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.records_dir).map_err(|e| AgentflowError::State {
            message: format!("Failed to read state directory: {}", e),
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl StateStore for FilesystemStateStore {
    async fn put(&self, record: &RunRecord) -> AgentflowResult<()> {
        let _lock = self.lock(&record.agent_name).await?;
        self.write_record(record)
    }

    async fn get(&self, agent: &str) -> AgentflowResult<Option<RunRecord>> {
        let path = self.record_path(agent)?;
        Self::read_record(&path)
    }

    async fn list(&self) -> AgentflowResult<Vec<RecordSnapshot>> {
        let mut snapshots = Vec::new();

        for path in self.record_files()? {
            let agent_name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            match Self::read_record(&path) {
                Ok(Some(record)) => {
                    snapshots.push(RecordSnapshot::Tracked(self.reconcile(record).await))
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(agent = %agent_name, error = %e, "unreadable state record");
                    snapshots.push(RecordSnapshot::Unreadable {
                        agent_name,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(snapshots)
    }

    async fn remove(&self, agent: &str) -> AgentflowResult<bool> {
        let _lock = self.lock(agent).await?;
        let path = self.record_path(agent)?;

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentflowError::FileWriteError {
                path,
                error: e.to_string(),
            }),
        }
    }

    async fn transition(
        &self,
        agent: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> AgentflowResult<Option<RunRecord>> {
        let _lock = self.lock(agent).await?;
        let path = self.record_path(agent)?;

        let Some(mut record) = Self::read_record(&path)? else {
            return Ok(None);
        };
        if record.status == RunStatus::Stopped && status != RunStatus::Stopped {
            return Ok(Some(record));
        }

        record.transition(status, error);
        self.write_record(&record)?;
        Ok(Some(record))
    }

    async fn claim(&self, agent: &str) -> AgentflowResult<StateLock> {
        Self::check_name(agent)?;
        StateLock::acquire(self.locks_dir.join(format!("{}.claim", agent)), self.lock_timeout).await
    }
}
