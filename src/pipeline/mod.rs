// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Agent pipelines
//!
//! Agent definitions and run options, the dependency graph, freshness
//! evaluation, validation and the level-by-level executor.

mod dag;
mod definition;
mod executor;
mod freshness;
mod validation;

pub use dag::{DagBuilder, ExecutionPlan, PlannedLevel};
pub use definition::*;
pub use executor::{
    AgentOutcome, PipelineEvent, PipelineExecutor, PipelineRunResult, PipelineSummary,
};
pub use freshness::FreshnessEvaluator;
pub use validation::{is_valid_agent_name, PipelineValidator, ValidationResult};
