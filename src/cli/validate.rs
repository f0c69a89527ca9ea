// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Validate command - check the agent definition file

use colored::Colorize;
use miette::Result;

use super::Context;
use crate::pipeline::{AgentSet, DagBuilder, PipelineValidator};

/// Run the validate command
pub async fn run(ctx: &Context) -> Result<()> {
    println!("{}", "Validating agent definitions...".bold());
    println!();

    if !ctx.definition.exists() {
        return Err(crate::errors::AgentflowError::DefinitionNotFound {
            path: ctx.definition.clone(),
        }
        .into());
    }

    let set = match AgentSet::from_file(&ctx.definition) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("  {} Failed to parse {}", "✗".red(), ctx.definition.display());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Definition file parses", "✓".green());

    let validation = PipelineValidator::validate(&set);
    let missing_prompts = PipelineValidator::missing_prompts(&set, &ctx.base_dir()?);

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing_prompts.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing prompts".yellow().bold());
        for missing in &missing_prompts {
            println!("  {} {}", "⚠".yellow(), missing);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if ctx.verbose && validation.is_valid() {
        let levels = DagBuilder::build(&set)?.levels()?;
        println!();
        println!("{}:", "Summary".bold());
        println!("  Name: {}", set.name);
        println!("  Agents: {}", set.agents.len());
        println!("  Levels: {}", levels.len());
    }

    println!();

    if has_issues {
        Err(miette::miette!("Agent definition validation failed"))
    } else if validation.has_warnings() {
        println!("{}", "Agent definitions are valid but have warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Agent definitions are valid!".green().bold());
        Ok(())
    }
}
