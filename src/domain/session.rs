//! Sessions and guard-rail policies
//!
//! One session per driver invocation. The driver is the single writer;
//! everything else observes via events. Messages are append-only and the
//! cost estimate is monotone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentInstance;
use super::cost::CostEstimate;
use super::id::generate_id;
use super::message::SessionMessage;

/// Declarative caps that force termination when breached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardRails {
    pub max_turns: u32,
    pub max_tokens_per_turn: u64,
    pub max_total_tokens: u64,
    pub max_tool_calls_per_turn: u32,
    pub max_tool_calls_total: u32,
    pub max_duration_secs: u64,
    pub max_single_turn_secs: u64,
    /// Paths tool calls may touch; empty = unrestricted
    pub allowed_paths: Vec<String>,
    /// Domains network tools may reach; empty = unrestricted
    pub allowed_domains: Vec<String>,
}

impl Default for GuardRails {
    fn default() -> Self {
        Self {
            max_turns: 30,
            max_tokens_per_turn: 4_000,
            max_total_tokens: 100_000,
            max_tool_calls_per_turn: 5,
            max_tool_calls_total: 50,
            max_duration_secs: 30 * 60,
            max_single_turn_secs: 3 * 60,
            allowed_paths: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

/// Which guard rail was breached, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardRailBreach {
    Turns,
    TotalTokens,
    ToolCallsTotal,
    Duration,
    TokensPerTurn,
    ToolCallsPerTurn,
    SingleTurnDuration,
}

impl GuardRails {
    /// Evaluate the run-level rails against observed totals
    pub fn check(&self, turns: u32, total_tokens: u64, tool_calls: u32, elapsed_secs: u64) -> Option<GuardRailBreach> {
        if turns >= self.max_turns {
            Some(GuardRailBreach::Turns)
        } else if total_tokens >= self.max_total_tokens {
            Some(GuardRailBreach::TotalTokens)
        } else if tool_calls >= self.max_tool_calls_total {
            Some(GuardRailBreach::ToolCallsTotal)
        } else if elapsed_secs >= self.max_duration_secs {
            Some(GuardRailBreach::Duration)
        } else {
            None
        }
    }

    /// Evaluate the per-turn rails against one turn's observed usage
    ///
    /// `turn_tool_calls` counts calls the model requested, not just the
    /// ones that were executed, so a capped turn still registers.
    pub fn check_turn(&self, turn_tokens: u64, turn_tool_calls: u32, turn_duration_secs: u64) -> Option<GuardRailBreach> {
        if turn_tokens > self.max_tokens_per_turn {
            Some(GuardRailBreach::TokensPerTurn)
        } else if turn_tool_calls > self.max_tool_calls_per_turn {
            Some(GuardRailBreach::ToolCallsPerTurn)
        } else if turn_duration_secs >= self.max_single_turn_secs {
            Some(GuardRailBreach::SingleTurnDuration)
        } else {
            None
        }
    }
}

/// One driver invocation's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// The user prompt that started the session
    pub prompt: String,
    /// Display name of the current phase
    pub phase: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub guard_rails: GuardRails,
    pub messages: Vec<SessionMessage>,
    pub agents: Vec<AgentInstance>,
    pub cost: CostEstimate,
}

impl Session {
    pub fn new(prompt: impl Into<String>, guard_rails: GuardRails) -> Self {
        let prompt = prompt.into();
        Self {
            id: generate_id("session", &prompt),
            prompt,
            phase: "Idle".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            guard_rails,
            messages: Vec::new(),
            agents: Vec::new(),
            cost: CostEstimate::zero(),
        }
    }

    /// Append a message; messages are immutable once appended
    pub fn append_message(&mut self, message: SessionMessage) {
        self.messages.push(message);
    }

    pub fn register_agent(&mut self, agent: AgentInstance) {
        self.agents.push(agent);
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut AgentInstance> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    /// Fold one turn's usage into the cost estimate
    pub fn record_turn(&mut self, input_tokens: u64, output_tokens: u64, usd: f64) {
        self.cost = self.cost.add_turn(input_tokens, output_tokens, usd);
    }

    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    pub fn complete(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}
