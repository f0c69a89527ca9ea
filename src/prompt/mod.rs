// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Instruction rendering
//!
//! Turns an agent's prompt reference into the text handed to its worker.
//! The orchestration core treats the result as opaque.

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::{AgentDefinition, Persona};

/// Values available to an instruction template
#[derive(Debug, Clone)]
pub struct InstructionContext<'a> {
    pub agent: &'a AgentDefinition,
    pub prd_path: &'a Path,
    pub output_path: Option<&'a Path>,
    pub output_dir: &'a Path,
    pub persona: Persona,
    /// Dependency names with their resolved outputs
    pub dependencies: Vec<(String, Option<PathBuf>)>,
}

impl InstructionContext<'_> {
    fn value(&self, key: &str) -> Option<String> {
        let value = match key {
            "agent" => self.agent.name.clone(),
            "prd_path" => self.prd_path.display().to_string(),
            "output_path" => self
                .output_path
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "output_dir" => self.output_dir.display().to_string(),
            "persona" => self.persona.to_string(),
            "persona_guidance" => persona_guidance(self.persona).to_string(),
            "dependencies" => self.dependency_list(),
            _ => return None,
        };
        Some(value)
    }

    fn dependency_list(&self) -> String {
        if self.dependencies.is_empty() {
            return "(none)".to_string();
        }
        self.dependencies
            .iter()
            .map(|(name, output)| match output {
                Some(path) => format!("- {}: {}", name, path.display()),
                None => format!("- {}", name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Renders the instructions for one agent
pub trait InstructionRenderer: Send + Sync {
    fn render(&self, context: &InstructionContext<'_>) -> AgentflowResult<String>;
}

/// Renders `{{ placeholder }}` templates from a prompts directory
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    prompts_dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    /// Substitute known placeholders; unknown ones are left as written
    pub fn render_str(template: &str, context: &InstructionContext<'_>) -> String {
        placeholder_pattern()
            .replace_all(template, |caps: &Captures<'_>| {
                context
                    .value(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

impl InstructionRenderer for TemplateRenderer {
    fn render(&self, context: &InstructionContext<'_>) -> AgentflowResult<String> {
        let template = match &context.agent.prompt {
            Some(prompt) => {
                let path = self.prompts_dir.join(prompt);
                std::fs::read_to_string(&path).map_err(|e| AgentflowError::FileReadError {
                    path,
                    error: e.to_string(),
                })?
            }
            None => DEFAULT_TEMPLATE.to_string(),
        };

        Ok(Self::render_str(&template, context))
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Guidance appended for each persona
pub fn persona_guidance(persona: Persona) -> &'static str {
    match persona {
        Persona::Minimal => {
            "Keep the deliverable short. Cover only what the next agent needs to proceed."
        }
        Persona::Balanced => {
            "Be thorough where it matters and brief elsewhere. Call out open risks."
        }
        Persona::Production => {
            "Treat this as production work. Cover edge cases, failure modes and operational concerns in full."
        }
    }
}

const DEFAULT_TEMPLATE: &str = "\
You are the {{ agent }} agent.

Read the product requirements at {{ prd_path }}.
Inputs from earlier agents:
{{ dependencies }}

Write your deliverable to {{ output_path }}.

{{ persona_guidance }}
";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context<'a>(agent: &'a AgentDefinition, output: &'a Path) -> InstructionContext<'a> {
        InstructionContext {
            agent,
            prd_path: Path::new("docs/prd.md"),
            output_path: Some(output),
            output_dir: Path::new("output"),
            persona: Persona::Production,
            dependencies: vec![(
                "architect".to_string(),
                Some(PathBuf::from("output/architecture.md")),
            )],
        }
    }

    #[test]
    fn test_render_str_substitutes_known_placeholders() {
        let agent = AgentDefinition::new("qa", Some("qa.md"), &["architect"]);
        let output = PathBuf::from("output/qa.md");
        let ctx = context(&agent, &output);

        let rendered = TemplateRenderer::render_str(
            "{{agent}} reads {{ prd_path }} -> {{ output_path }} [{{ persona }}] {{ other }}",
            &ctx,
        );
        assert_eq!(
            rendered,
            "qa reads docs/prd.md -> output/qa.md [production] {{ other }}"
        );
    }

    #[test]
    fn test_default_template_lists_dependencies() {
        let agent = AgentDefinition::new("qa", Some("qa.md"), &["architect"]);
        let output = PathBuf::from("output/qa.md");
        let rendered = TemplateRenderer::new("prompts")
            .render(&context(&agent, &output))
            .unwrap();

        assert!(rendered.contains("You are the qa agent."));
        assert!(rendered.contains("- architect: output/architecture.md"));
        assert!(rendered.contains("production work"));
    }

    #[test]
    fn test_prompt_file_is_read_from_prompts_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("qa.md"), "Review {{ dependencies }}").unwrap();

        let mut agent = AgentDefinition::new("qa", Some("qa.md"), &["architect"]);
        agent.prompt = Some(PathBuf::from("qa.md"));
        let output = PathBuf::from("output/qa.md");

        let rendered = TemplateRenderer::new(dir.path())
            .render(&context(&agent, &output))
            .unwrap();
        assert_eq!(rendered, "Review - architect: output/architecture.md");
    }

    #[test]
    fn test_missing_prompt_file_is_io_error() {
        let mut agent = AgentDefinition::new("qa", Some("qa.md"), &[]);
        agent.prompt = Some(PathBuf::from("missing.md"));
        let output = PathBuf::from("output/qa.md");

        let err = TemplateRenderer::new("/nonexistent")
            .render(&context(&agent, &output))
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Io);
    }
}
