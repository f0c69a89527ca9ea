// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Agent set validation
//!
//! Validates an agent set before anything is spawned.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use std::sync::OnceLock;

use crate::errors::AgentflowError;
use crate::pipeline::{AgentDefinition, AgentSet, DagBuilder};

fn agent_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("agent name pattern is valid")
    })
}

/// Whether a name is usable as an agent name (and a record file name)
pub fn is_valid_agent_name(name: &str) -> bool {
    agent_name_pattern().is_match(name)
}

/// Agent set validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate an agent set
    pub fn validate(set: &AgentSet) -> ValidationResult {
        let mut result = ValidationResult::new();

        if set.agents.is_empty() {
            result.add_error("No agents defined");
        }

        let mut seen_names = HashSet::new();
        for agent in &set.agents {
            if !seen_names.insert(&agent.name) {
                result.add_error(&format!("Duplicate agent name: '{}'", agent.name));
            }
        }

        let mut outputs: HashMap<&Path, &str> = HashMap::new();
        for agent in &set.agents {
            if let Some(ref output) = agent.output {
                if let Some(other) = outputs.insert(output.as_path(), &agent.name) {
                    result.add_error(&format!(
                        "Agents '{}' and '{}' declare the same output '{}'",
                        other,
                        agent.name,
                        output.display()
                    ));
                }
            }
        }

        if seen_names.len() == set.agents.len() {
            match DagBuilder::build(set) {
                Ok(_) => {}
                Err(e) => result.add_error(&e.to_string()),
            }
        }

        for agent in &set.agents {
            Self::validate_agent(agent, &mut result);
        }

        if set.worker.command.trim().is_empty() {
            result.add_error("worker.command is empty");
        }
        if set.worker.ports.start != 0 && set.worker.ports.start >= set.worker.ports.end {
            result.add_error(&format!(
                "worker.ports range {}..{} is empty",
                set.worker.ports.start, set.worker.ports.end
            ));
        }

        result
    }

    /// Validate and convert the first error into a fatal configuration error
    pub fn ensure_valid(set: &AgentSet) -> Result<ValidationResult, AgentflowError> {
        let result = Self::validate(set);
        if let Some(first) = result.errors.first() {
            return Err(AgentflowError::InvalidDefinition {
                reason: first.clone(),
                help: (result.errors.len() > 1)
                    .then(|| format!("{} more error(s); run 'agentflow validate'", result.errors.len() - 1)),
            });
        }
        Ok(result)
    }

    /// Referenced prompt files that do not exist
    pub fn missing_prompts(set: &AgentSet, base_path: &Path) -> Vec<String> {
        let prompts_dir = base_path.join(&set.prompts_dir);

        set.agents
            .iter()
            .filter_map(|agent| {
                let prompt = agent.prompt.as_ref()?;
                (!prompts_dir.join(prompt).exists()).then(|| {
                    format!(
                        "Agent '{}': prompt file not found: {}",
                        agent.name,
                        set.prompts_dir.join(prompt).display()
                    )
                })
            })
            .collect()
    }

    fn validate_agent(agent: &AgentDefinition, result: &mut ValidationResult) {
        if !is_valid_agent_name(&agent.name) {
            result.add_error(&format!(
                "Agent name '{}' may only contain letters, digits, '-' and '_'",
                agent.name
            ));
        }

        match &agent.output {
            Some(output) => {
                let escapes = output.is_absolute()
                    || output
                        .components()
                        .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
                if escapes {
                    result.add_error(&format!(
                        "Agent '{}': output '{}' must stay inside the output directory",
                        agent.name,
                        output.display()
                    ));
                }
                if output.as_os_str().is_empty() {
                    result.add_error(&format!("Agent '{}': output path is empty", agent.name));
                }
            }
            None => result.add_warning(&format!(
                "Agent '{}' declares no output and will always run",
                agent.name
            )),
        }

        if agent.prompt.is_none() {
            result.add_warning(&format!(
                "Agent '{}' has no prompt; built-in instructions will be used",
                agent.name
            ));
        }
    }
}

/// Result of agent set validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
