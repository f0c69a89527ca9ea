// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Run command - execute the pipeline

use clap::Args;
use colored::Colorize;
use indicatif::ProgressBar;
use miette::Result;
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::warn;

use super::Context;
use crate::errors::AgentflowResult;
use crate::pipeline::{
    AgentOutcome, AgentSet, FailurePolicy, Persona, PipelineEvent, PipelineExecutor,
    PipelineSummary, PipelineValidator, RunMode, RunOptions,
};
use crate::utils::{create_agent_bar, format_duration, outcome_symbol};

/// Options for `agentflow run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Product requirements document handed to every agent
    #[clap(long, env = "AGENTFLOW_PRD", default_value = "prd.md")]
    pub prd: PathBuf,

    /// Run only these agents (comma-separated)
    #[clap(short, long, env = "AGENTFLOW_AGENTS", value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Persona for rendered instructions (minimal, balanced, production)
    #[clap(long, env = "AGENTFLOW_PERSONA", default_value = "balanced")]
    pub persona: String,

    /// Freshness mode (normal, resume, force)
    #[clap(short, long, env = "AGENTFLOW_MODE", default_value = "normal")]
    pub mode: String,

    /// Run one agent at a time
    #[clap(long)]
    pub sequential: bool,

    /// Per-agent timeout in seconds (0 = wait for completion)
    #[clap(short, long, env = "AGENTFLOW_TIMEOUT", default_value = "0")]
    pub timeout: u64,

    /// Directory agent outputs are written to
    #[clap(short, long, env = "AGENTFLOW_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// What a failure does to agents that have not started (block-dependents, abort)
    #[clap(long, env = "AGENTFLOW_FAILURE_POLICY", default_value = "block-dependents")]
    pub failure_policy: String,

    /// Show what would run without spawning anything
    #[clap(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Convert to executor options; invalid enum values are configuration errors
    pub fn to_options(&self, verbose: bool) -> AgentflowResult<RunOptions> {
        let mut options = RunOptions::new(&self.prd);
        options.agents = self.agents.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect();
        options.persona = self.persona.parse::<Persona>()?;
        options.mode = self.mode.parse::<RunMode>()?;
        options.failure_policy = self.failure_policy.parse::<FailurePolicy>()?;
        options.sequential = self.sequential;
        options.timeout = RunOptions::timeout_from_secs(self.timeout);
        options.output_dir = self.output_dir.clone();
        options.dry_run = self.dry_run;
        options.verbose = verbose;
        Ok(options)
    }
}

/// Run the pipeline
pub async fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let set = ctx.load_set()?;
    let options = args.to_options(ctx.verbose)?;

    let validation = PipelineValidator::validate(&set);
    if validation.has_warnings() && ctx.verbose {
        eprintln!("{}", "Agent definition warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    if options.dry_run {
        return print_plan(&set, &options);
    }

    let scheduled = PipelineExecutor::plan(&set, &options)?.scheduled_agents().len();
    let orchestrator = ctx.open(set)?;

    let cancel = orchestrator.cancellation().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping running agents");
            cancel.cancel();
        }
    });

    let bar = create_agent_bar(scheduled as u64);
    let (tx, rx) = mpsc::unbounded_channel();
    let render = tokio::spawn(render_events(rx, bar.clone(), ctx.verbose));

    let executor = orchestrator.executor().with_events(tx);
    let outcome = executor
        .execute(orchestrator.agent_set(), orchestrator.base_dir(), &options)
        .await;
    drop(executor);

    let _ = render.await;
    interrupt.abort();
    bar.finish_and_clear();

    let summary = outcome?;
    print_summary(&summary);

    if summary.cancelled {
        Err(miette::miette!("Pipeline cancelled"))
    } else if !summary.is_success() {
        Err(miette::miette!(
            "{} agent(s) failed, {} blocked",
            summary.failed,
            summary.blocked
        ))
    } else {
        Ok(())
    }
}

/// Print pipeline progress above the bar until the executor hangs up
async fn render_events(mut rx: UnboundedReceiver<PipelineEvent>, bar: ProgressBar, verbose: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::LevelStarted { index, agents } => {
                bar.println(format!(
                    "{} Level {}: {}",
                    "→".blue(),
                    index,
                    agents.join(", ")
                ));
            }
            PipelineEvent::AgentSkipped { agent } => {
                bar.println(format!(
                    "  {} {} {}",
                    outcome_symbol(AgentOutcome::Skipped),
                    agent,
                    "(fresh)".dimmed()
                ));
                bar.inc(1);
            }
            PipelineEvent::AgentStarted { agent, pid, port } => {
                if verbose {
                    bar.println(format!(
                        "  {} {} {}",
                        "▶".cyan(),
                        agent,
                        format!("(pid {}, port {})", pid, port).dimmed()
                    ));
                }
            }
            PipelineEvent::AgentFinished { result } => {
                // Blocked results were already reported by AgentBlocked
                if result.outcome == AgentOutcome::Blocked {
                    continue;
                }
                let mut line = format!(
                    "  {} {} {}",
                    outcome_symbol(result.outcome),
                    result.agent_name,
                    format!("({})", format_duration(result.duration)).dimmed()
                );
                if let Some(ref error) = result.error_detail {
                    line.push_str(&format!(": {}", error.red()));
                }
                bar.println(line);
                bar.inc(1);
            }
            PipelineEvent::AgentBlocked { agent, reason } => {
                bar.println(format!(
                    "  {} {} {}",
                    outcome_symbol(AgentOutcome::Blocked),
                    agent,
                    format!("({})", reason).dimmed()
                ));
                bar.inc(1);
            }
            PipelineEvent::Cancelled => {
                bar.println(format!("{} {}", "⚠".yellow(), "Cancelled".yellow().bold()));
            }
        }
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!();
    println!(
        "{}: {} succeeded, {} skipped, {} failed, {} blocked in {}",
        "Summary".bold(),
        summary.succeeded.to_string().green(),
        summary.skipped,
        summary.failed.to_string().red(),
        summary.blocked.to_string().yellow(),
        format_duration(summary.total_duration)
    );

    let outputs: Vec<_> = summary
        .results
        .iter()
        .filter(|r| r.outcome.satisfies_dependents())
        .filter_map(|r| r.output_path.as_ref())
        .collect();

    if !outputs.is_empty() {
        println!();
        println!("{}:", "Outputs".bold());
        for output in outputs {
            println!("  - {}", output.display());
        }
    }
}

fn print_plan(set: &AgentSet, options: &RunOptions) -> Result<()> {
    let plan = PipelineExecutor::plan(set, options)?;

    println!("{}", "Dry run: nothing will be spawned".yellow().bold());
    println!();
    for level in &plan.scheduled {
        println!("Level {}:", level.index);
        for agent in &level.agents {
            let output = set
                .get_agent(agent)
                .and_then(|a| a.output_in(&options.output_dir))
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(no output)".to_string());
            println!("  - {} → {}", agent, output.dimmed());
        }
    }

    if !plan.context.is_empty() {
        println!();
        println!(
            "{} {}",
            "Inputs from unselected agents:".bold(),
            plan.context.join(", ")
        );
    }

    println!();
    println!(
        "Mode: {}, persona: {}, {}",
        options.mode,
        options.persona,
        if options.sequential { "sequential" } else { "concurrent" }
    );
    Ok(())
}
