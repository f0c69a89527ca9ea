// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Progress indicators for pipeline runs

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a single long-running agent
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Bar counting agents that reached a terminal state
pub fn create_agent_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} agents {elapsed:.dim}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_bar_counts() {
        let pb = create_agent_bar(3);
        pb.inc(2);
        assert_eq!(pb.position(), 2);
        assert_eq!(pb.length(), Some(3));
        pb.finish_and_clear();
    }
}
