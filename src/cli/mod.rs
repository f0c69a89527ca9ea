// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for agentflow.

pub mod graph;
pub mod list;
pub mod run;
pub mod run_agent;
pub mod send;
pub mod serve;
pub mod status;
pub mod stop;
pub mod validate;

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::{Path, PathBuf};

use crate::pipeline::{AgentSet, DEFAULT_DEFINITION_FILE};
use crate::tools::Orchestrator;

pub use run::RunArgs;
pub use run_agent::RunAgentArgs;

/// Pipeline orchestrator for file-producing worker agents
#[derive(Parser, Debug)]
#[clap(
    name = "agentflow",
    version,
    about = "Run dependent worker agents as a DAG, level by level",
    long_about = None,
    after_help = "Examples:\n\
        agentflow run --prd prd.md          Run every agent\n\
        agentflow run --mode resume         Skip agents with fresh outputs\n\
        agentflow status                    Show tracked agents\n\
        agentflow stop qa                   Stop one agent\n\n\
        See 'agentflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Agent definition file
    #[clap(
        short,
        long,
        global = true,
        env = "AGENTFLOW_FILE",
        default_value = DEFAULT_DEFINITION_FILE
    )]
    pub file: PathBuf,

    /// State directory shared by agentflow processes on this host
    #[clap(long, global = true, env = "AGENTFLOW_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run(RunArgs),

    /// Run a single agent
    RunAgent(RunAgentArgs),

    /// List defined agents
    List,

    /// Show tracked agents and whether they are alive
    Status {
        /// Only this agent
        agent: Option<String>,

        /// Print the status as JSON
        #[clap(long)]
        json: bool,
    },

    /// Send guidance to a running agent
    Send {
        /// Agent name
        agent: String,

        /// Message text
        message: String,
    },

    /// Stop one agent, or every tracked agent
    Stop {
        /// Agent name (default: all tracked agents)
        agent: Option<String>,
    },

    /// Show the agent graph
    Graph {
        /// Output format
        #[clap(long, default_value = "text")]
        format: GraphFormat,
    },

    /// Validate the agent definition file
    Validate,

    /// Serve the orchestration tools as JSON-RPC over stdio
    Serve,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Global options shared by every command handler
#[derive(Debug, Clone)]
pub struct Context {
    pub definition: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl From<&Cli> for Context {
    fn from(cli: &Cli) -> Self {
        Self {
            definition: cli.file.clone(),
            state_dir: cli.state_dir.clone(),
            verbose: cli.verbose,
        }
    }
}

impl Context {
    /// Load the agent set from the definition file
    pub fn load_set(&self) -> Result<AgentSet> {
        Ok(AgentSet::from_file(&self.definition)?)
    }

    /// Directory the definition file lives in; relative paths resolve here
    pub fn base_dir(&self) -> Result<PathBuf> {
        let cwd = std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
        Ok(match self.definition.parent() {
            Some(parent) if parent != Path::new("") => cwd.join(parent),
            _ => cwd,
        })
    }

    /// Open an orchestrator over the loaded set
    pub fn open(&self, set: AgentSet) -> Result<Orchestrator> {
        Ok(Orchestrator::open(
            set,
            self.base_dir()?,
            self.state_dir.clone(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "agentflow",
            "-v",
            "run",
            "--prd",
            "docs/prd.md",
            "--agents",
            "architect,qa",
            "--sequential",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.prd, PathBuf::from("docs/prd.md"));
                assert_eq!(args.agents, vec!["architect", "qa"]);
                assert!(args.sequential);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_base_dir_follows_definition_file() {
        let ctx = Context {
            definition: PathBuf::from("pipelines/sdlc.yaml"),
            state_dir: None,
            verbose: false,
        };
        assert!(ctx.base_dir().unwrap().ends_with("pipelines"));

        let ctx = Context {
            definition: PathBuf::from(DEFAULT_DEFINITION_FILE),
            ..ctx
        };
        assert_eq!(ctx.base_dir().unwrap(), std::env::current_dir().unwrap());
    }

    #[test]
    fn test_graph_format_from_str() {
        assert_eq!("DOT".parse::<GraphFormat>(), Ok(GraphFormat::Dot));
        assert!("svg".parse::<GraphFormat>().is_err());
    }

    #[test]
    fn test_parse_graph_format() {
        let cli = Cli::try_parse_from(["agentflow", "graph", "--format", "mermaid"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Graph {
                format: GraphFormat::Mermaid
            }
        ));

        let cli = Cli::try_parse_from(["agentflow", "graph"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Graph {
                format: GraphFormat::Text
            }
        ));

        assert!(Cli::try_parse_from(["agentflow", "graph", "--format", "svg"]).is_err());
    }
}
