// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Stop command - terminate tracked agents

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::tools::StopAgentsParams;

/// Stop one agent, or every tracked agent individually
pub async fn run(ctx: &Context, agent: Option<String>) -> Result<()> {
    let orchestrator = ctx.open(ctx.load_set()?)?;
    let result = orchestrator
        .stop_agents(StopAgentsParams { agent_name: agent.clone() })
        .await?;

    if result.stopped.is_empty() && result.success {
        match agent {
            Some(name) => println!("{} is not tracked", name.bold()),
            None => println!("No tracked agents"),
        }
        return Ok(());
    }

    for name in &result.stopped {
        println!("  {} stopped {}", "■".yellow(), name);
    }

    match result.error {
        Some(error) => Err(miette::miette!("Some agents could not be stopped: {}", error)),
        None => Ok(()),
    }
}
