// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Graph command - visualize agent dependencies

use miette::Result;

use super::{Context, GraphFormat};
use crate::pipeline::DagBuilder;

/// Run the graph command
pub async fn run(ctx: &Context, format: GraphFormat) -> Result<()> {
    let set = ctx.load_set()?;
    let dag = DagBuilder::build(&set)?;

    let output = match format {
        GraphFormat::Text => dag.to_text()?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
