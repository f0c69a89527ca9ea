// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! List command - show defined agents

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::pipeline::DagBuilder;

/// List the agents of the definition file
pub async fn run(ctx: &Context) -> Result<()> {
    let set = ctx.load_set()?;
    let levels = DagBuilder::build(&set)?.levels()?;

    println!("{} ({} agents)", set.name.bold(), set.agents.len());
    println!();

    for (index, level) in levels.iter().enumerate() {
        for name in level {
            let Some(agent) = set.get_agent(name) else {
                continue;
            };
            let output = agent
                .output
                .as_ref()
                .map(|o| o.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {} {} → {}", format!("[{}]", index).dimmed(), agent.name.bold(), output);
            if !agent.depends_on.is_empty() {
                println!("      {}", format!("depends on: {}", agent.depends_on.join(", ")).dimmed());
            }
            if ctx.verbose {
                if let Some(ref description) = agent.description {
                    println!("      {}", description);
                }
            }
        }
    }

    Ok(())
}
