// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Send command - deliver guidance to a running agent

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::tools::SendMessageParams;

pub async fn run(ctx: &Context, agent: String, message: String) -> Result<()> {
    let orchestrator = ctx.open(ctx.load_set()?)?;
    let result = orchestrator
        .send_message(SendMessageParams {
            agent_name: agent.clone(),
            message,
        })
        .await;

    if result.success {
        println!("{} Message delivered to {}", "✓".green(), agent.bold());
        Ok(())
    } else {
        Err(miette::miette!(
            "{}",
            result.error.unwrap_or_else(|| format!("failed to message {}", agent))
        ))
    }
}
