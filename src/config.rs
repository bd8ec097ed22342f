//! Driver configuration types and loading
//!
//! Settings load through a fallback chain: explicit path, project-local
//! `.deskpilot.yml`, user config under `~/.config/deskpilot/`, then
//! built-in defaults. Partial files are fine; unset keys keep defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::RoleOverride;
use crate::domain::GuardRails;
use crate::retry::RetryPolicy;
use crate::scheduler::StageRunnerConfig;
use crate::workspace::WorkspaceStrategy;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub team: TeamSettings,
    pub office: OfficeSettings,
    pub panel: PanelSettings,
}

impl Config {
    /// Load configuration with the fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".deskpilot.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("deskpilot").join("deskpilot.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Team orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
    /// Concurrent worker sessions during stage execution
    #[serde(rename = "max-parallel-sessions")]
    pub max_parallel_sessions: usize,

    #[serde(rename = "workspace-strategy")]
    pub workspace_strategy: WorkspaceStrategy,

    pub retry: RetryPolicy,

    #[serde(rename = "orchestrator-model")]
    pub orchestrator_model: Option<String>,

    #[serde(rename = "worker-model")]
    pub worker_model: Option<String>,

    #[serde(rename = "working-directory")]
    pub working_directory: PathBuf,

    #[serde(rename = "enabled-mcp-servers")]
    pub enabled_mcp_servers: Vec<String>,

    #[serde(rename = "disabled-skills")]
    pub disabled_skills: Vec<String>,

    #[serde(rename = "auto-approve-read-only-tools")]
    pub auto_approve_read_only_tools: bool,

    /// Per-chunk wall-clock timeout
    #[serde(rename = "worker-timeout-secs")]
    pub worker_timeout_secs: u64,

    /// Timeout for each orchestrator LLM call
    #[serde(rename = "orchestrator-llm-timeout-secs")]
    pub orchestrator_llm_timeout_secs: u64,

    /// Keep the orchestrator session alive for follow-up questions
    #[serde(rename = "maintain-follow-up-context")]
    pub maintain_follow_up_context: bool,

    #[serde(rename = "max-retries-per-chunk")]
    pub max_retries_per_chunk: u32,

    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    #[serde(rename = "abort-failure-threshold")]
    pub abort_failure_threshold: u32,

    /// Per-role overrides keyed by role name
    #[serde(rename = "role-configs")]
    pub role_configs: HashMap<String, RoleOverride>,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            max_parallel_sessions: 5,
            workspace_strategy: WorkspaceStrategy::default(),
            retry: RetryPolicy::default(),
            orchestrator_model: None,
            worker_model: None,
            working_directory: PathBuf::from("."),
            enabled_mcp_servers: Vec::new(),
            disabled_skills: Vec::new(),
            auto_approve_read_only_tools: true,
            worker_timeout_secs: 10 * 60,
            orchestrator_llm_timeout_secs: 5 * 60,
            maintain_follow_up_context: true,
            max_retries_per_chunk: 2,
            retry_delay_secs: 5,
            abort_failure_threshold: 3,
            role_configs: HashMap::new(),
        }
    }
}

impl TeamSettings {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn orchestrator_llm_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator_llm_timeout_secs)
    }

    /// Stage-runner view of these settings
    pub fn stage_runner_config(&self) -> StageRunnerConfig {
        StageRunnerConfig {
            max_parallel: self.max_parallel_sessions,
            max_retries_per_chunk: self.max_retries_per_chunk,
            retry_delay_ms: self.retry_delay_secs * 1000,
            abort_failure_threshold: self.abort_failure_threshold,
            worker_timeout_ms: self.worker_timeout_secs * 1000,
        }
    }
}

/// Commentary delivery mode for the office manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CommentaryMode {
    /// Buffer until the response ends, then emit one entry
    #[default]
    CompleteThought,
    /// Emit each streamed chunk
    StreamingTokens,
}

/// Office manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeSettings {
    /// Standing objective the manager works toward
    pub objective: String,

    #[serde(rename = "workspace-path")]
    pub workspace_path: PathBuf,

    #[serde(rename = "check-interval-minutes")]
    pub check_interval_minutes: u64,

    #[serde(rename = "max-assistants")]
    pub max_assistants: usize,

    #[serde(rename = "max-queue-depth")]
    pub max_queue_depth: usize,

    #[serde(rename = "manager-model")]
    pub manager_model: Option<String>,

    #[serde(rename = "assistant-model")]
    pub assistant_model: Option<String>,

    #[serde(rename = "assistant-timeout-seconds")]
    pub assistant_timeout_seconds: u64,

    #[serde(rename = "manager-llm-timeout-seconds")]
    pub manager_llm_timeout_seconds: u64,

    /// Retries per assistant task
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "require-plan-approval")]
    pub require_plan_approval: bool,

    #[serde(rename = "commentary-streaming-mode")]
    pub commentary_streaming_mode: CommentaryMode,
}

impl Default for OfficeSettings {
    fn default() -> Self {
        Self {
            objective: String::new(),
            workspace_path: PathBuf::from("."),
            check_interval_minutes: 5,
            max_assistants: 3,
            max_queue_depth: 20,
            manager_model: None,
            assistant_model: None,
            assistant_timeout_seconds: 120,
            manager_llm_timeout_seconds: 60,
            max_retries: 2,
            require_plan_approval: true,
            commentary_streaming_mode: CommentaryMode::default(),
        }
    }
}

impl OfficeSettings {
    pub fn rest_duration(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn assistant_timeout(&self) -> Duration {
        Duration::from_secs(self.assistant_timeout_seconds)
    }

    pub fn manager_llm_timeout(&self) -> Duration {
        Duration::from_secs(self.manager_llm_timeout_seconds)
    }
}

/// Discussion depth preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Depth {
    /// The head infers depth from the prompt
    Auto,
    Quick,
    #[default]
    Standard,
    Deep,
}

/// Which panelist personas to seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PanelistPreset {
    #[default]
    Quick,
    Balanced,
    All,
    Custom,
}

/// Panel discussion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    #[serde(rename = "max-turns")]
    pub max_turns: u32,

    #[serde(rename = "max-tokens-per-turn")]
    pub max_tokens_per_turn: u64,

    #[serde(rename = "max-total-tokens")]
    pub max_total_tokens: u64,

    #[serde(rename = "max-duration-minutes")]
    pub max_duration_minutes: u64,

    #[serde(rename = "max-tool-calls-per-turn")]
    pub max_tool_calls_per_turn: u32,

    #[serde(rename = "max-tool-calls")]
    pub max_tool_calls: u32,

    #[serde(rename = "max-single-turn-secs")]
    pub max_single_turn_secs: u64,

    #[serde(rename = "allow-file-system-access")]
    pub allow_file_system_access: bool,

    pub depth: Depth,

    #[serde(rename = "panelist-preset")]
    pub panelist_preset: PanelistPreset,

    /// Personas for the Custom preset
    #[serde(rename = "custom-personas")]
    pub custom_personas: Vec<String>,

    /// Convergence score required to end the discussion
    #[serde(rename = "convergence-threshold")]
    pub convergence_threshold: u8,

    /// Run a convergence evaluation every N turns
    #[serde(rename = "convergence-check-interval")]
    pub convergence_check_interval: u32,

    #[serde(rename = "head-model")]
    pub head_model: Option<String>,

    #[serde(rename = "moderator-model")]
    pub moderator_model: Option<String>,

    #[serde(rename = "panelist-model")]
    pub panelist_model: Option<String>,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            max_turns: 30,
            max_tokens_per_turn: 4_000,
            max_total_tokens: 100_000,
            max_duration_minutes: 30,
            max_tool_calls_per_turn: 5,
            max_tool_calls: 50,
            max_single_turn_secs: 3 * 60,
            allow_file_system_access: false,
            depth: Depth::default(),
            panelist_preset: PanelistPreset::default(),
            custom_personas: Vec::new(),
            convergence_threshold: 80,
            convergence_check_interval: 4,
            head_model: None,
            moderator_model: None,
            panelist_model: None,
        }
    }
}

impl PanelSettings {
    /// Depth presets adjust turn cap and convergence threshold
    pub fn effective(&self) -> PanelSettings {
        let mut settings = self.clone();
        match self.depth {
            Depth::Quick => {
                settings.max_turns = 10;
                settings.convergence_threshold = 60;
            }
            Depth::Deep => {
                settings.max_turns = 50;
                settings.convergence_threshold = 90;
            }
            Depth::Standard | Depth::Auto => {}
        }
        settings
    }

    /// Guard-rail view of these settings
    pub fn guard_rails(&self) -> GuardRails {
        let effective = self.effective();
        GuardRails {
            max_turns: effective.max_turns,
            max_tokens_per_turn: effective.max_tokens_per_turn,
            max_total_tokens: effective.max_total_tokens,
            max_tool_calls_per_turn: effective.max_tool_calls_per_turn,
            max_tool_calls_total: effective.max_tool_calls,
            max_duration_secs: effective.max_duration_minutes * 60,
            max_single_turn_secs: effective.max_single_turn_secs,
            allowed_paths: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.team.max_parallel_sessions, 5);
        assert!(config.team.auto_approve_read_only_tools);
        assert!(config.team.maintain_follow_up_context);
        assert_eq!(config.office.check_interval_minutes, 5);
        assert_eq!(config.office.max_assistants, 3);
        assert_eq!(config.office.max_queue_depth, 20);
        assert_eq!(config.panel.max_turns, 30);
        assert_eq!(config.panel.convergence_threshold, 80);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
team:
  max-parallel-sessions: 2
office:
  check-interval-minutes: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.team.max_parallel_sessions, 2);
        assert_eq!(config.team.worker_timeout_secs, 600);
        assert_eq!(config.office.check_interval_minutes, 10);
        assert_eq!(config.office.max_assistants, 3);
    }

    #[test]
    fn test_commentary_mode_parsing() {
        let yaml = r#"
office:
  commentary-streaming-mode: streaming-tokens
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.office.commentary_streaming_mode, CommentaryMode::StreamingTokens);
    }

    #[test]
    fn test_depth_presets() {
        let quick = PanelSettings {
            depth: Depth::Quick,
            ..Default::default()
        }
        .effective();
        assert_eq!(quick.max_turns, 10);
        assert_eq!(quick.convergence_threshold, 60);

        let deep = PanelSettings {
            depth: Depth::Deep,
            ..Default::default()
        }
        .effective();
        assert_eq!(deep.max_turns, 50);
        assert_eq!(deep.convergence_threshold, 90);

        let standard = PanelSettings::default().effective();
        assert_eq!(standard.max_turns, 30);
        assert_eq!(standard.convergence_threshold, 80);
    }

    #[test]
    fn test_guard_rails_from_panel_settings() {
        let rails = PanelSettings::default().guard_rails();
        assert_eq!(rails.max_turns, 30);
        assert_eq!(rails.max_total_tokens, 100_000);
        assert_eq!(rails.max_duration_secs, 1_800);
    }

    #[test]
    fn test_stage_runner_config_conversion() {
        let team = TeamSettings {
            max_parallel_sessions: 7,
            retry_delay_secs: 2,
            ..Default::default()
        };
        let runner = team.stage_runner_config();
        assert_eq!(runner.max_parallel, 7);
        assert_eq!(runner.retry_delay_ms, 2_000);
        assert_eq!(runner.worker_timeout_ms, 600_000);
    }

    #[test]
    fn test_workspace_strategy_parsing() {
        let yaml = r#"
team:
  workspace-strategy: git-worktree
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.team.workspace_strategy, WorkspaceStrategy::GitWorktree);
    }

    #[test]
    fn test_role_override_parsing() {
        let yaml = r#"
team:
  role-configs:
    Implementation:
      model: claude-opus-4
      temperature: 0.1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let over = &config.team.role_configs["Implementation"];
        assert_eq!(over.model.as_deref(), Some("claude-opus-4"));
        assert_eq!(over.temperature, Some(0.1));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let path = PathBuf::from("/definitely/not/here.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
