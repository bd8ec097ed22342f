//! Per-role configuration
//!
//! Each role carries system instructions, preferred tools, an optional
//! MCP server subset, and optional model/temperature overrides. Driver
//! settings can override any field per role.

use serde::{Deserialize, Serialize};

use crate::domain::Role;

/// Resolved configuration for one role
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub role: Role,
    /// Handlebars template for the system prompt
    pub system_prompt: String,
    /// Preferred tool subset; empty = all tools
    pub preferred_tools: Vec<String>,
    /// MCP servers this role may use; None = all enabled servers
    pub mcp_servers: Option<Vec<String>>,
    pub model_override: Option<String>,
    pub temperature: Option<f32>,
}

/// Partial per-role override from driver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleOverride {
    #[serde(rename = "system-prompt")]
    pub system_prompt: Option<String>,
    #[serde(rename = "preferred-tools")]
    pub preferred_tools: Option<Vec<String>>,
    #[serde(rename = "mcp-servers")]
    pub mcp_servers: Option<Vec<String>>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl RoleConfig {
    /// Apply a settings override on top of the catalogue defaults
    pub fn merged_with(mut self, over: &RoleOverride) -> Self {
        if let Some(prompt) = &over.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(tools) = &over.preferred_tools {
            self.preferred_tools = tools.clone();
        }
        if let Some(servers) = &over.mcp_servers {
            self.mcp_servers = Some(servers.clone());
        }
        if let Some(model) = &over.model {
            self.model_override = Some(model.clone());
        }
        if let Some(temperature) = over.temperature {
            self.temperature = Some(temperature);
        }
        self
    }
}

const WORKER_PREAMBLE: &str = "Work only within {{#if working_dir}}{{working_dir}}{{else}}the provided workspace{{/if}}.\n\
{{#if injected}}Additional instructions from the user:\n{{#each injected}}- {{this}}\n{{/each}}{{/if}}\
{{#if prior_error}}A previous attempt failed with: {{prior_error}}\nAvoid repeating that failure.\n{{/if}}\
\nTask:\n{{task}}";

/// Default configuration for a role
pub fn role_config(role: Role) -> RoleConfig {
    let (system_prompt, preferred_tools): (String, Vec<&str>) = match role {
        Role::Planning => (
            format!(
                "You are a planning agent. Evaluate whether the task is clear enough to decompose. \
                 If not, ask focused clarifying questions. Once clear, produce a plan of small, \
                 self-contained chunks with explicit dependencies.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.list", "fs.grep"],
        ),
        Role::CodeAnalysis => (
            format!(
                "You are a code analysis agent. Read the relevant code and report structure, \
                 risks, and the facts later chunks will need. Do not modify anything.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.list", "fs.grep"],
        ),
        Role::MemoryDiagnostics => (
            format!(
                "You are a memory diagnostics agent. Investigate allocation patterns, leaks, and \
                 retention issues, and report findings with evidence.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.grep", "shell.exec"],
        ),
        Role::Performance => (
            format!(
                "You are a performance agent. Profile, measure, and report bottlenecks before \
                 proposing changes.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.grep", "shell.exec"],
        ),
        Role::Testing => (
            format!(
                "You are a testing agent. Write and run tests for the described behaviour; report \
                 failures verbatim.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.write", "shell.exec"],
        ),
        Role::Implementation => (
            format!(
                "You are an implementation agent. Make the described change completely, keeping \
                 to the existing style of the codebase.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.write", "fs.edit", "shell.exec"],
        ),
        Role::Synthesis => (
            "You are a synthesis agent. Combine the worker results below into one conversational \
             summary for the user. Mark each concrete follow-up as [ACTION:<description>].\n\n{{task}}"
                .to_string(),
            vec![],
        ),
        Role::Generic => (format!("You are a general-purpose agent.\n\n{}", WORKER_PREAMBLE), vec![
            "fs.read", "fs.write", "fs.list",
        ]),
        Role::Head => (
            "You are the head of a panel discussion. Clarify the user's question, brief the \
             panel, and when the discussion ends produce the consolidated synthesis.\n\n{{task}}"
                .to_string(),
            vec![],
        ),
        Role::Moderator => (
            "You are the moderator of a panel discussion. Inspect the recent transcript and \
             answer in JSON with fields: nextSpeaker, convergenceScore (0-100), stopDiscussion, \
             allowParallelThinking, parallelGroup, redirectMessage. Keep the discussion on \
             topic and stop it once positions are stable.\n\n{{task}}"
                .to_string(),
            vec![],
        ),
        Role::Panelist => (
            "You are {{persona}}, an expert panelist. Argue from your perspective, engage with \
             the other panelists' points, and concede when convinced.\n\n{{task}}"
                .to_string(),
            vec!["fs.read"],
        ),
        Role::Manager => (
            "You are an office manager supervising a workspace. Each iteration, list the tasks \
             that need doing in priority order, then aggregate your assistants' results into a \
             concise report.\n\n{{task}}"
                .to_string(),
            vec!["fs.read", "fs.list"],
        ),
        Role::Assistant => (
            format!(
                "You are an ephemeral assistant. Complete exactly the task you were handed and \
                 report the outcome; you will be disposed afterwards.\n\n{}",
                WORKER_PREAMBLE
            ),
            vec!["fs.read", "fs.write", "fs.list", "shell.exec"],
        ),
    };

    RoleConfig {
        role,
        system_prompt,
        preferred_tools: preferred_tools.into_iter().map(String::from).collect(),
        mcp_servers: None,
        model_override: None,
        temperature: match role {
            Role::Moderator => Some(0.0),
            Role::Panelist => Some(0.9),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::prompts::{PromptContext, render_prompt};

    #[test]
    fn test_every_role_has_config() {
        for role in [
            Role::Planning,
            Role::CodeAnalysis,
            Role::MemoryDiagnostics,
            Role::Performance,
            Role::Testing,
            Role::Implementation,
            Role::Synthesis,
            Role::Generic,
            Role::Head,
            Role::Moderator,
            Role::Panelist,
            Role::Manager,
            Role::Assistant,
        ] {
            let config = role_config(role);
            assert_eq!(config.role, role);
            assert!(!config.system_prompt.is_empty());
        }
    }

    #[test]
    fn test_templates_render() {
        let ctx = PromptContext::for_task("fix the build")
            .with_working_dir("/tmp/ws")
            .with_persona("Security")
            .with_injected(vec!["prefer small diffs".into()]);

        for role in [Role::Implementation, Role::Panelist, Role::Moderator, Role::Manager] {
            let config = role_config(role);
            let rendered = render_prompt(&config.system_prompt, &ctx).unwrap();
            assert!(rendered.contains("fix the build"), "role {:?}", role);
        }
    }

    #[test]
    fn test_moderator_is_deterministic() {
        assert_eq!(role_config(Role::Moderator).temperature, Some(0.0));
    }

    #[test]
    fn test_override_merging() {
        let over = RoleOverride {
            model: Some("claude-haiku".into()),
            temperature: Some(0.3),
            preferred_tools: Some(vec!["fs.read".into()]),
            ..Default::default()
        };
        let merged = role_config(Role::Implementation).merged_with(&over);
        assert_eq!(merged.model_override.as_deref(), Some("claude-haiku"));
        assert_eq!(merged.temperature, Some(0.3));
        assert_eq!(merged.preferred_tools, vec!["fs.read".to_string()]);
        // Unset fields keep their defaults
        assert!(merged.system_prompt.contains("implementation agent"));
    }
}
