// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Process and socket inspection
//!
//! Thin wrappers over `kill(2)` and, on Linux, `/proc`. Everything here is
//! best-effort: an unanswerable question yields `None` or `false`.

use chrono::{DateTime, Utc};

/// Signals the supervisor sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

fn valid_pid(pid: u32) -> Option<i32> {
    // 0 and values that wrap negative would address process groups
    i32::try_from(pid).ok().filter(|p| *p > 0)
}

/// Whether a process with this PID exists and is not a zombie
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Some(raw) = valid_pid(pid) else {
        return false;
    };

    // SAFETY: signal 0 performs only the existence and permission check.
    let ret = unsafe { libc::kill(raw, 0) };
    let exists = ret == 0
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);

    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Send a signal to one process
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let raw = valid_pid(pid).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid pid {}", pid))
    })?;
    // SAFETY: raw is a positive PID, so this addresses exactly one process.
    let ret = unsafe { libc::kill(raw, raw_signal(signal)) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: Signal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on unix",
    ))
}

/// Send a signal to the process group led by `pgid`
#[cfg(unix)]
pub fn send_group_signal(pgid: u32, signal: Signal) -> std::io::Result<()> {
    let raw = valid_pid(pgid).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid pgid {}", pgid))
    })?;
    // SAFETY: a negative PID addresses the group whose id is `raw`.
    let ret = unsafe { libc::kill(-raw, raw_signal(signal)) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_group_signal(pgid: u32, signal: Signal) -> std::io::Result<()> {
    send_signal(pgid, signal)
}

#[cfg(unix)]
fn raw_signal(signal: Signal) -> libc::c_int {
    match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    }
}

/// Fields of `/proc/<pid>/stat` the supervisor uses
#[derive(Debug, Clone, Copy)]
struct ProcStat {
    state: char,
    ppid: u32,
    start_ticks: u64,
}

#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> Option<ProcStat> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    Some(ProcStat {
        state: fields.first()?.chars().next()?,
        ppid: fields.get(1)?.parse().ok()?,
        start_ticks: fields.get(19)?.parse().ok()?,
    })
}

#[cfg(not(target_os = "linux"))]
fn read_stat(_pid: u32) -> Option<ProcStat> {
    None
}

fn is_zombie(pid: u32) -> bool {
    read_stat(pid).is_some_and(|s| matches!(s.state, 'Z' | 'X'))
}

/// Parent PID of a process
pub fn parent_pid(pid: u32) -> Option<u32> {
    read_stat(pid).map(|s| s.ppid)
}

/// Whether `pid` is `ancestor` or one of its descendants
pub fn is_descendant(pid: u32, ancestor: u32) -> bool {
    let mut current = pid;
    for _ in 0..64 {
        if current == ancestor {
            return true;
        }
        match parent_pid(current) {
            Some(parent) if parent > 1 && parent != current => current = parent,
            _ => return false,
        }
    }
    false
}

/// Wall-clock start time of a process
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let stat = read_stat(pid)?;
    let boot_secs: i64 = std::fs::read_to_string("/proc/stat")
        .ok()?
        .lines()
        .find_map(|l| l.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;

    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let ticks = if ticks > 0 { ticks as u64 } else { 100 };

    let offset_ms = stat.start_ticks.saturating_mul(1000) / ticks;
    DateTime::from_timestamp_millis(boot_secs * 1000 + offset_ms as i64)
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_time(_pid: u32) -> Option<DateTime<Utc>> {
    None
}

/// PID of the process listening on a local TCP port
#[cfg(target_os = "linux")]
pub fn listener_pid(port: u16) -> Option<u32> {
    let inodes = listening_inodes(port);
    if inodes.is_empty() {
        return None;
    }

    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Unreadable fd tables belong to other users; skip them
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };

        for fd in fds.flatten() {
            let Ok(target) = std::fs::read_link(fd.path()) else {
                continue;
            };
            let target = target.to_string_lossy();
            let inode = target
                .strip_prefix("socket:[")
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|s| s.parse::<u64>().ok());
            if inode.is_some_and(|i| inodes.contains(&i)) {
                return Some(pid);
            }
        }
    }

    None
}

#[cfg(not(target_os = "linux"))]
pub fn listener_pid(_port: u16) -> Option<u32> {
    None
}

#[cfg(target_os = "linux")]
fn listening_inodes(port: u16) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";

    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (Some(local), Some(state), Some(inode)) =
                (fields.get(1), fields.get(3), fields.get(9))
            else {
                continue;
            };
            let local_port = local
                .rsplit(':')
                .next()
                .and_then(|p| u16::from_str_radix(p, 16).ok());
            if local_port == Some(port) && *state == TCP_LISTEN {
                if let Ok(inode) = inode.parse::<u64>() {
                    inodes.push(inode);
                }
            }
        }
    }
    inodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_start_time_is_in_the_past() {
        let started = process_start_time(std::process::id()).unwrap();
        assert!(started <= Utc::now());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_listener_pid_finds_own_socket() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_eq!(listener_pid(port), Some(std::process::id()));
        drop(listener);
        assert_eq!(listener_pid(port), None);
    }

    #[test]
    fn test_process_is_its_own_descendant() {
        let pid = std::process::id();
        assert!(is_descendant(pid, pid));
    }
}
