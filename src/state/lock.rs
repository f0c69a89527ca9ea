// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Cross-process lock files
//!
//! A lock is a file created with `O_CREAT | O_EXCL` holding the owner's PID.
//! A lock whose owner is no longer alive is stale and gets broken. So is
//! one left empty by a holder that died between creating and writing it.
//! Breaking happens under a second `.break` file, so a lock that was broken
//! and re-taken is never removed by a slower breaker.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{AgentflowError, AgentflowResult};
use crate::supervisor::os;

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Age after which a lock without a readable owner is abandoned
const ABANDONED_AFTER: Duration = Duration::from_secs(2);

/// A held lock file; released on drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock at `path`, waiting up to `timeout`
    pub async fn acquire(path: PathBuf, timeout: Duration) -> AgentflowResult<Self> {
        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(std::process::id().to_string().as_bytes())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::break_if_stale(&path) {
                        continue;
                    }
                }
                Err(e) => {
                    return Err(AgentflowError::State {
                        message: format!("cannot create lock '{}': {}", path.display(), e),
                    })
                }
            }

            if Instant::now() >= deadline {
                return Err(AgentflowError::LockTimeout { path });
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn break_if_stale(path: &Path) -> bool {
        if Self::stale_owner(path).is_none() {
            return false;
        }

        // Only the holder of the breaker file may remove a stale lock
        let breaker = breaker_path(path);
        match OpenOptions::new().write(true).create_new(true).open(&breaker) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_abandoned(&breaker) {
                    debug!(breaker = %breaker.display(), "removing abandoned breaker");
                    let _ = std::fs::remove_file(&breaker);
                }
                return false;
            }
            Err(e) => {
                debug!(breaker = %breaker.display(), error = %e, "cannot create breaker");
                return false;
            }
        }

        // The lock may have been broken and taken again since the first look
        let broken = match Self::stale_owner(path) {
            Some(owner) => {
                warn!(lock = %path.display(), owner = %owner, "breaking stale lock");
                match std::fs::remove_file(path) {
                    Ok(()) => true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                    Err(e) => {
                        debug!(lock = %path.display(), error = %e, "failed to remove stale lock");
                        false
                    }
                }
            }
            None => false,
        };

        if let Err(e) = std::fs::remove_file(&breaker) {
            debug!(breaker = %breaker.display(), error = %e, "failed to remove breaker");
        }
        broken
    }

    /// Contents of a lock that no live process holds
    ///
    /// An empty or unparsable lock is one still being written, unless it has
    /// sat untouched for [`ABANDONED_AFTER`].
    fn stale_owner(path: &Path) -> Option<String> {
        let owner = std::fs::read_to_string(path).ok()?.trim().to_string();
        match owner.parse::<u32>() {
            Ok(pid) if os::process_alive(pid) => None,
            Ok(_) => Some(owner),
            Err(_) => is_abandoned(path).then_some(owner),
        }
    }
}

fn breaker_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".break");
    path.with_file_name(name)
}

fn is_abandoned(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age >= ABANDONED_AFTER)
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");

        let held = StateLock::acquire(path.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        let second = StateLock::acquire(path.clone(), Duration::from_millis(100)).await;
        assert!(matches!(second, Err(AgentflowError::LockTimeout { .. })));

        drop(held);
        assert!(!path.exists());
        assert!(StateLock::acquire(path, Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        // PIDs are capped well below u32::MAX on every supported platform
        std::fs::write(&path, (u32::MAX - 1).to_string()).unwrap();

        let lock = StateLock::acquire(path.clone(), Duration::from_millis(500)).await;
        assert!(lock.is_ok());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
        assert!(!breaker_path(&path).exists());
    }

    #[tokio::test]
    async fn test_abandoned_empty_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        drop(file);

        let lock = StateLock::acquire(path.clone(), Duration::from_millis(500)).await;
        assert!(lock.is_ok());
    }

    #[tokio::test]
    async fn test_fresh_empty_lock_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        std::fs::File::create(&path).unwrap();

        let lock = StateLock::acquire(path.clone(), Duration::from_millis(100)).await;
        assert!(matches!(lock, Err(AgentflowError::LockTimeout { .. })));
        assert!(path.exists());
    }

    #[test]
    fn test_live_lock_is_not_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(!StateLock::break_if_stale(&path));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_stale_lock_waits_for_active_breaker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        std::fs::write(&path, (u32::MAX - 1).to_string()).unwrap();
        std::fs::File::create(breaker_path(&path)).unwrap();

        let lock = StateLock::acquire(path.clone(), Duration::from_millis(100)).await;
        assert!(matches!(lock, Err(AgentflowError::LockTimeout { .. })));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_abandoned_breaker_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa.lock");
        std::fs::write(&path, (u32::MAX - 1).to_string()).unwrap();
        let breaker = std::fs::File::create(breaker_path(&path)).unwrap();
        breaker
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        drop(breaker);

        let lock = StateLock::acquire(path.clone(), Duration::from_millis(500)).await;
        assert!(lock.is_ok());
        assert!(!breaker_path(&path).exists());
    }
}
