// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Serve command - expose the orchestration tools over stdio

use miette::{IntoDiagnostic, Result};
use std::sync::Arc;

use super::Context;
use crate::tools::router::ToolRouter;

pub async fn run(ctx: &Context) -> Result<()> {
    let orchestrator = ctx.open(ctx.load_set()?)?;
    ToolRouter::new(Arc::new(orchestrator))
        .serve_stdio()
        .await
        .into_diagnostic()
}
