//! Prompt template rendering
//!
//! Role instruction templates are Handlebars; contexts are plain
//! serialisable structs so templates stay data-driven.

use eyre::{Context as _, Result};
use handlebars::Handlebars;
use serde::Serialize;

/// Context available to role prompt templates
#[derive(Debug, Clone, Serialize, Default)]
pub struct PromptContext {
    /// The task or chunk prompt
    pub task: String,
    /// Working directory the agent should confine itself to
    pub working_dir: Option<String>,
    /// Persona name for panelists
    pub persona: Option<String>,
    /// Instructions injected by the user mid-run
    pub injected: Vec<String>,
    /// Error context from a failed prior attempt
    pub prior_error: Option<String>,
}

impl PromptContext {
    pub fn for_task(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn with_injected(mut self, injected: Vec<String>) -> Self {
        self.injected = injected;
        self
    }

    pub fn with_prior_error(mut self, error: impl Into<String>) -> Self {
        self.prior_error = Some(error.into());
        self
    }
}

/// Render a Handlebars template with the given context
pub fn render_prompt(template: &str, ctx: &impl Serialize) -> Result<String> {
    let handlebars = Handlebars::new();
    handlebars
        .render_template(template, ctx)
        .context("Failed to render prompt template")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic() {
        let ctx = PromptContext::for_task("refactor the parser");
        let rendered = render_prompt("Task: {{task}}", &ctx).unwrap();
        assert_eq!(rendered, "Task: refactor the parser");
    }

    #[test]
    fn test_render_conditionals() {
        let template = "{{task}}{{#if prior_error}}\nPrevious attempt failed: {{prior_error}}{{/if}}";

        let ctx = PromptContext::for_task("t");
        assert_eq!(render_prompt(template, &ctx).unwrap(), "t");

        let ctx = ctx.with_prior_error("segfault");
        let rendered = render_prompt(template, &ctx).unwrap();
        assert!(rendered.contains("Previous attempt failed: segfault"));
    }

    #[test]
    fn test_render_injected_list() {
        let template = "{{#each injected}}- {{this}}\n{{/each}}";
        let ctx = PromptContext::for_task("t").with_injected(vec!["focus on tests".into(), "skip docs".into()]);
        let rendered = render_prompt(template, &ctx).unwrap();
        assert!(rendered.contains("- focus on tests"));
        assert!(rendered.contains("- skip docs"));
    }
}
