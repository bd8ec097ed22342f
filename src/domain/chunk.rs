//! Work chunks and orchestration plans (Team)
//!
//! A [`WorkChunk`] is the atomic unit of a Team plan. The serialised form
//! is the plan JSON contract exchanged with the orchestrator agent and the
//! UI; it must round-trip unchanged. Runtime state lives in
//! [`ChunkResult`], set by the scheduler, never in the definition.

use serde::{Deserialize, Serialize};

use super::role::Role;

/// Relative size of a chunk, as judged by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Immutable definition of one unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkChunk {
    pub id: String,
    pub sequence_index: u32,
    pub title: String,
    /// Self-contained prompt; a worker sees nothing else about the task
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Subdirectory the worker should confine itself to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_scope: Option<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
    pub assigned_role: Role,
}

/// Runtime status of a chunk, owned by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    #[default]
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Outcome of executing one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: String,
    pub status: ChunkStatus,
    /// Worker output on success; last error text otherwise
    pub output: String,
    pub retries: u32,
    pub duration_ms: u64,
    /// Workspace path the chunk ran in, when isolation was used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Overall plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Proposed,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// A dependency-ordered set of chunks
///
/// Serialises to the plan JSON contract: `{id, chunks: [...]}` with
/// camelCase keys. Dependencies must reference chunks in the same plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    pub id: String,
    pub chunks: Vec<WorkChunk>,
}

impl OrchestrationPlan {
    pub fn new(id: impl Into<String>, chunks: Vec<WorkChunk>) -> Self {
        Self { id: id.into(), chunks }
    }

    pub fn chunk(&self, id: &str) -> Option<&WorkChunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Ids referenced as dependencies that are not chunks of this plan
    pub fn dangling_dependencies(&self) -> Vec<String> {
        self.chunks
            .iter()
            .flat_map(|c| c.depends_on.iter())
            .filter(|dep| self.chunk(dep).is_none())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
