// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Status command - show tracked agents

use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use super::Context;
use crate::tools::{AgentState, GetStatusParams};

/// Show reconciled status of tracked agents
pub async fn run(ctx: &Context, agent: Option<String>, json: bool) -> Result<()> {
    let orchestrator = ctx.open(ctx.load_set()?)?;
    let status = orchestrator
        .get_status(GetStatusParams { agent_name: agent.clone() })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status).into_diagnostic()?);
        return Ok(());
    }

    if status.agents.is_empty() {
        match agent {
            Some(name) => println!("{} is not tracked", name.bold()),
            None => println!("No tracked agents"),
        }
        return Ok(());
    }

    for entry in &status.agents {
        let state = match entry.status {
            AgentState::Running => "running".green().bold(),
            AgentState::Stable => "stable".dimmed(),
        };
        let port = entry
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        print!("  {:<16} {:<8} port {:<6}", entry.name.bold(), state, port);
        if let Some(ref started) = entry.started_at {
            print!(" {}", format!("since {}", started).dimmed());
        }
        println!();
        if let Some(ref error) = entry.error {
            println!("      {}", error.yellow());
        }
    }

    Ok(())
}
