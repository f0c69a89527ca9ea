// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Terminal styling
//!
//! Shared symbols and formatting for CLI output.

use colored::{ColoredString, Colorize};
use std::time::Duration;

use crate::pipeline::AgentOutcome;

/// Symbol for a per-agent outcome
pub fn outcome_symbol(outcome: AgentOutcome) -> ColoredString {
    match outcome {
        AgentOutcome::Succeeded => "✓".green(),
        AgentOutcome::Skipped => "○".dimmed(),
        AgentOutcome::Failed => "✗".red(),
        AgentOutcome::Blocked => "⊘".yellow(),
    }
}

/// Human-readable duration, e.g. `4.21s` or `3m 05s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
