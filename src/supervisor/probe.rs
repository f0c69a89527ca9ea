// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Liveness probing
//!
//! A stored PID may since have been reused by an unrelated process, so a
//! record is only trusted after its PID and control port are checked
//! against the live process table.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::os;
use crate::state::{RunRecord, RunStatus};

/// Slack between process start and the record's `started_at`
const START_SLACK_SECS: i64 = 2;

/// Processes and process groups to signal when stopping an agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTargets {
    pub processes: Vec<u32>,
    pub groups: Vec<u32>,
}

impl StopTargets {
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty() && self.groups.is_empty()
    }
}

/// Capability to decide whether a recorded agent process is alive
pub trait LivenessProbe: Send + Sync {
    /// Whether the process behind a record is still running
    fn is_alive(&self, record: &RunRecord) -> bool;

    /// The live processes that belong to a record
    fn stop_targets(&self, record: &RunRecord) -> StopTargets;
}

/// Probe based on the recorded PID and the owner of the control port
#[derive(Debug, Clone, Copy, Default)]
pub struct PortProbe;

impl PortProbe {
    pub fn new() -> Self {
        Self
    }

    /// Whether the recorded PID still names the process that was spawned
    fn pid_is_genuine(&self, record: &RunRecord) -> bool {
        if !os::process_alive(record.pid) {
            return false;
        }
        match os::process_start_time(record.pid) {
            Some(started) => started <= record.started_at + ChronoDuration::seconds(START_SLACK_SECS),
            // No start time available: trust the PID
            None => true,
        }
    }

    /// The process listening on the control port, if it belongs to the record
    ///
    /// A finished record's port may already serve another agent, so only
    /// the genuine PID or one of its descendants is accepted there. A
    /// `Running` record also accepts a listener started after it, which
    /// covers workers that re-parent their server.
    fn port_owner(&self, record: &RunRecord, genuine: bool) -> Option<u32> {
        if record.control_port == 0 {
            return None;
        }
        let owner = os::listener_pid(record.control_port)?;

        let related = genuine && (owner == record.pid || os::is_descendant(owner, record.pid));
        let belongs = related
            || (record.status == RunStatus::Running && started_after(owner, record.started_at));
        belongs.then_some(owner)
    }
}

fn started_after(pid: u32, since: DateTime<Utc>) -> bool {
    os::process_start_time(pid)
        .is_some_and(|started| started + ChronoDuration::seconds(START_SLACK_SECS) >= since)
}

impl LivenessProbe for PortProbe {
    fn is_alive(&self, record: &RunRecord) -> bool {
        self.pid_is_genuine(record) || self.port_owner(record, false).is_some()
    }

    fn stop_targets(&self, record: &RunRecord) -> StopTargets {
        let mut targets = StopTargets::default();
        let genuine = self.pid_is_genuine(record);

        if genuine {
            // Workers lead their own process group
            targets.groups.push(record.pid);
            targets.processes.push(record.pid);
        }

        if let Some(owner) = self.port_owner(record, genuine) {
            if !targets.processes.contains(&owner) {
                targets.processes.push(owner);
            }
        }

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        let record = RunRecord::running("self", std::process::id(), 0);
        let probe = PortProbe::new();

        assert!(probe.is_alive(&record));
        let targets = probe.stop_targets(&record);
        assert_eq!(targets.processes, vec![std::process::id()]);
    }

    #[test]
    fn test_dead_pid_is_not_alive() {
        let record = RunRecord::running("ghost", u32::MAX - 1, 0);
        let probe = PortProbe::new();

        assert!(!probe.is_alive(&record));
        assert!(probe.stop_targets(&record).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reused_pid_is_rejected() {
        // The record predates our own process, so the PID was reused
        let mut record = RunRecord::running("reused", std::process::id(), 0);
        record.started_at = DateTime::from_timestamp(946_684_800, 0).unwrap();

        assert!(!PortProbe::new().is_alive(&record));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_port_owner_counts_as_alive() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let record = RunRecord::running("listener", std::process::id(), port);

        let targets = PortProbe::new().stop_targets(&record);
        assert!(targets.processes.contains(&std::process::id()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_finished_record_ignores_port_reused_by_another_process() {
        // Our listener started after the record, as a later agent's would
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut record = RunRecord::running("finished", u32::MAX - 1, port);
        record.started_at = DateTime::from_timestamp(946_684_800, 0).unwrap();
        let probe = PortProbe::new();

        assert!(probe.is_alive(&record));

        record.status = RunStatus::Failed;
        assert!(!probe.is_alive(&record));
        assert!(probe.stop_targets(&record).is_empty());
    }
}
