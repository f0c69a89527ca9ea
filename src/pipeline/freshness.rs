// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Freshness evaluation
//!
//! Decides per agent whether re-execution can be skipped, by comparing the
//! modification time of its output with those of its dependency outputs and
//! the run's root inputs.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::errors::AgentflowError;
use crate::pipeline::RunMode;

/// Freshness evaluator
pub struct FreshnessEvaluator;

impl FreshnessEvaluator {
    /// Whether an agent must run
    ///
    /// `output` is the agent's resolved output path, if it declares one.
    /// A missing dependency output counts as newer than anything, so the
    /// dependent re-runs. Root inputs that do not exist are ignored.
    pub fn should_run(
        output: Option<&Path>,
        mode: RunMode,
        dep_outputs: &[PathBuf],
        root_inputs: &[PathBuf],
    ) -> bool {
        match mode {
            RunMode::Normal | RunMode::Force => true,
            RunMode::Resume => !Self::is_fresh(output, dep_outputs, root_inputs),
        }
    }

    fn is_fresh(output: Option<&Path>, dep_outputs: &[PathBuf], root_inputs: &[PathBuf]) -> bool {
        // Completeness of an agent without an output cannot be checked
        let Some(output) = output else {
            return false;
        };
        let Some(output_mtime) = modified(output) else {
            return false;
        };

        for dep in dep_outputs {
            match modified(dep) {
                Some(dep_mtime) if output_mtime >= dep_mtime => {}
                _ => {
                    debug!(output = %output.display(), dependency = %dep.display(), "stale against dependency");
                    return false;
                }
            }
        }

        for input in root_inputs {
            if let Some(input_mtime) = modified(input) {
                if output_mtime < input_mtime {
                    debug!(output = %output.display(), input = %input.display(), "stale against root input");
                    return false;
                }
            }
        }

        true
    }

    /// Delete a stale output before a forced run
    pub fn clear_output(output: &Path) -> Result<bool, AgentflowError> {
        match std::fs::remove_file(output) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentflowError::FileWriteError {
                path: output.to_path_buf(),
                error: e.to_string(),
            }),
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_times(FileTimes::new().set_modified(when)).unwrap();
        path
    }

    #[test]
    fn test_normal_and_force_always_run() {
        let dir = TempDir::new().unwrap();
        let out = touch(&dir, "out.md", 0);

        assert!(FreshnessEvaluator::should_run(Some(out.as_path()), RunMode::Normal, &[], &[]));
        assert!(FreshnessEvaluator::should_run(Some(out.as_path()), RunMode::Force, &[], &[]));
    }

    #[test]
    fn test_resume_skips_fresh_output() {
        let dir = TempDir::new().unwrap();
        let prd = touch(&dir, "prd.md", 300);
        let dep = touch(&dir, "dep.md", 200);
        let out = touch(&dir, "out.md", 100);

        assert!(!FreshnessEvaluator::should_run(
            Some(out.as_path()),
            RunMode::Resume,
            &[dep],
            &[prd]
        ));
    }

    #[test]
    fn test_resume_runs_when_dependency_is_newer() {
        let dir = TempDir::new().unwrap();
        let out = touch(&dir, "out.md", 200);
        let dep = touch(&dir, "dep.md", 100);

        assert!(FreshnessEvaluator::should_run(Some(out.as_path()), RunMode::Resume, &[dep], &[]));
    }

    #[test]
    fn test_resume_runs_when_root_input_is_newer() {
        let dir = TempDir::new().unwrap();
        let out = touch(&dir, "out.md", 200);
        let prd = touch(&dir, "prd.md", 10);

        assert!(FreshnessEvaluator::should_run(Some(out.as_path()), RunMode::Resume, &[], &[prd]));
    }

    #[test]
    fn test_resume_runs_when_dependency_output_missing() {
        let dir = TempDir::new().unwrap();
        let out = touch(&dir, "out.md", 0);
        let missing = dir.path().join("missing.md");

        assert!(FreshnessEvaluator::should_run(
            Some(out.as_path()),
            RunMode::Resume,
            &[missing],
            &[]
        ));
    }

    #[test]
    fn test_resume_runs_without_declared_or_existing_output() {
        let dir = TempDir::new().unwrap();

        assert!(FreshnessEvaluator::should_run(None, RunMode::Resume, &[], &[]));
        assert!(FreshnessEvaluator::should_run(
            Some(dir.path().join("absent.md").as_path()),
            RunMode::Resume,
            &[],
            &[]
        ));
    }

    #[test]
    fn test_clear_output() {
        let dir = TempDir::new().unwrap();
        let out = touch(&dir, "out.md", 0);

        assert!(FreshnessEvaluator::clear_output(&out).unwrap());
        assert!(!out.exists());
        assert!(!FreshnessEvaluator::clear_output(&out).unwrap());
    }
}
