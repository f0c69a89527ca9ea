// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! agentflow - Agent Pipeline Orchestrator
//!
//! Run dependent worker agents level by level.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentflow::cli::{Cli, Commands, Context};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries command output and tool responses
    let default_filter = if cli.verbose {
        "agentflow=debug"
    } else {
        "agentflow=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let ctx = Context::from(&cli);

    // Dispatch to command handlers
    match cli.command {
        Commands::Run(args) => agentflow::cli::run::run(&ctx, args).await,
        Commands::RunAgent(args) => agentflow::cli::run_agent::run(&ctx, args).await,
        Commands::List => agentflow::cli::list::run(&ctx).await,
        Commands::Status { agent, json } => agentflow::cli::status::run(&ctx, agent, json).await,
        Commands::Send { agent, message } => {
            agentflow::cli::send::run(&ctx, agent, message).await
        }
        Commands::Stop { agent } => agentflow::cli::stop::run(&ctx, agent).await,
        Commands::Graph { format } => agentflow::cli::graph::run(&ctx, format).await,
        Commands::Validate => agentflow::cli::validate::run(&ctx).await,
        Commands::Serve => agentflow::cli::serve::run(&ctx).await,
    }
}
