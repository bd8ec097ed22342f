//! Agent instance bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::role::Role;

/// Lifecycle status of an agent instance
///
/// Transitions are monotone forward except Paused ↔ Active. Disposed is
/// terminal: a disposed agent never produces messages or tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Active,
    Thinking,
    Contributed,
    Paused,
    Disposed,
}

impl AgentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Active => 1,
            Self::Thinking => 2,
            Self::Contributed => 3,
            Self::Paused => 4,
            Self::Disposed => 5,
        }
    }

    /// Whether a transition to `to` is legal
    pub fn can_transition(self, to: AgentStatus) -> bool {
        match (self, to) {
            (a, b) if a == b => false,
            (Self::Disposed, _) => false,
            // Pausing is allowed from any live state and resumes to Active
            (_, Self::Paused) => true,
            (Self::Paused, Self::Active) => true,
            (Self::Paused, Self::Disposed) => true,
            (Self::Paused, _) => false,
            (a, b) => b.rank() > a.rank(),
        }
    }
}

/// A single agent spawned within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    /// Provider-qualified model identifier, e.g. `anthropic/claude-sonnet-4`
    pub model: String,
    pub status: AgentStatus,
    pub turns_completed: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(display_name: impl Into<String>, role: Role, model: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            id: generate_id("agent", &display_name),
            display_name,
            role,
            model: model.into(),
            status: AgentStatus::Created,
            turns_completed: 0,
            created_at: Utc::now(),
        }
    }

    /// Apply a status transition; illegal transitions are ignored
    pub fn set_status(&mut self, status: AgentStatus) -> bool {
        if self.status.can_transition(status) {
            self.status = status;
            true
        } else {
            false
        }
    }

    pub fn record_turn(&mut self) {
        self.turns_completed += 1;
    }

    pub fn is_disposed(&self) -> bool {
        self.status == AgentStatus::Disposed
    }
}
