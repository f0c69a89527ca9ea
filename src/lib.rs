// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! # agentflow - Agent Pipeline Orchestrator
//!
//! `agentflow` runs long-lived worker agents as a dependency graph. Each
//! agent consumes the outputs of the agents it depends on and produces one
//! file of its own.
//!
//! ## Features
//!
//! - **Level scheduling** - Independent agents run concurrently
//! - **Freshness** - Resume mode skips agents whose output is up to date
//! - **Supervision** - Spawn, await, message and stop worker processes
//! - **Shared state** - Any agentflow process on the host sees every agent
//! - **Tool server** - The same operations over JSON-RPC
//!
//! ## Quick Start
//!
//! ```bash
//! # Run every agent against a PRD
//! agentflow run --prd prd.md
//!
//! # Only re-run what is stale
//! agentflow run --prd prd.md --mode resume
//!
//! # Inspect and stop running agents
//! agentflow status
//! agentflow stop
//! ```

pub mod cli;
pub mod errors;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod supervisor;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use errors::{AgentflowError, AgentflowResult, ErrorKind};
pub use pipeline::{AgentDefinition, AgentSet, PipelineExecutor, PipelineSummary, RunOptions};
pub use supervisor::ProcessSupervisor;
pub use tools::Orchestrator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
