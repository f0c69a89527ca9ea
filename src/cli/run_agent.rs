// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Run-agent command - run one agent against the PRD

use clap::Args;
use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::Context;
use crate::tools::RunAgentParams;
use crate::utils::{create_spinner, format_duration};

/// Options for `agentflow run-agent`
#[derive(Args, Debug, Clone)]
pub struct RunAgentArgs {
    /// Agent to run
    pub agent: String,

    /// Product requirements document
    #[clap(long, env = "AGENTFLOW_PRD", default_value = "prd.md")]
    pub prd: PathBuf,

    /// Directory the output is written to
    #[clap(short, long, env = "AGENTFLOW_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Persona for rendered instructions
    #[clap(long, env = "AGENTFLOW_PERSONA")]
    pub persona: Option<String>,
}

/// Run a single agent
pub async fn run(ctx: &Context, args: RunAgentArgs) -> Result<()> {
    let set = ctx.load_set()?;
    if set.get_agent(&args.agent).is_none() {
        return Err(crate::errors::AgentflowError::AgentNotFound { agent: args.agent }.into());
    }
    let orchestrator = ctx.open(set)?;

    let spinner = create_spinner(&format!("Running {}", args.agent.bold()));
    let result = orchestrator
        .run_agent(RunAgentParams {
            prd_path: args.prd,
            agent_name: args.agent,
            output_dir: args.output_dir,
            persona: args.persona,
            verbose: Some(ctx.verbose),
        })
        .await;
    spinner.finish_and_clear();

    let result = result?;
    let took = format_duration(std::time::Duration::from_secs_f64(result.duration));
    if result.success {
        println!(
            "{} {} {}",
            "✓".green(),
            result.agent,
            format!("({})", took).dimmed()
        );
        if !result.output_path.is_empty() {
            println!("  - {}", result.output_path);
        }
        Ok(())
    } else {
        println!("{} {} {}", "✗".red(), result.agent, format!("({})", took).dimmed());
        Err(miette::miette!(
            "Agent '{}' failed: {}",
            result.agent,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
