//! Event types for driver activity streaming
//!
//! Events represent all observable activity across the three drivers:
//! phase transitions, plan/stage lifecycle, worker and assistant
//! lifecycle, streamed commentary, user interaction, and completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::SchedulingDecision;

/// An event published on the bus
///
/// `correlation_id` links the event to the user command that triggered
/// it, letting the UI tell user-driven transitions apart from internal
/// ones (timeouts, errors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            kind,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.name()
    }
}

/// The vocabulary of driver activity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    // === Phase ===
    PhaseChanged {
        from: String,
        to: String,
        reason: String,
    },

    // === Plan / stages ===
    PlanCreated {
        plan_id: String,
        chunk_count: usize,
    },
    StageStarted {
        stage_index: usize,
        chunk_ids: Vec<String>,
    },
    StageCompleted {
        stage_index: usize,
    },

    // === Worker / assistant lifecycle ===
    WorkerStarted {
        worker_id: String,
        role: String,
    },
    WorkerProgress {
        worker_id: String,
        activity: String,
        progress_pct: u8,
    },
    WorkerCompleted {
        worker_id: String,
        summary: String,
    },
    WorkerFailed {
        worker_id: String,
        error: String,
    },
    WorkerRetrying {
        worker_id: String,
        attempt: u32,
        error: String,
    },
    SchedulingDecision {
        task_id: String,
        decision: SchedulingDecision,
    },

    // === Streamed commentary ===
    OrchestratorCommentary {
        text: String,
    },
    WorkerCommentary {
        agent_id: String,
        text: String,
    },
    ToolInvocation {
        agent_id: String,
        tool: String,
        args_summary: String,
    },
    ToolResult {
        agent_id: String,
        tool: String,
        success: bool,
        output_summary: String,
        duration_ms: u64,
    },
    Reasoning {
        agent_id: String,
        text: String,
    },

    // === Interaction ===
    ClarificationRequested {
        questions: Vec<String>,
    },
    ClarificationReceived {
        answer: String,
    },
    InjectionReceived {
        instruction: String,
    },
    ApprovalRequested {
        request_id: String,
        tool: String,
        args_summary: String,
    },
    ApprovalResolved {
        request_id: String,
        approved: bool,
        reason: String,
    },

    // === Completion ===
    TaskCompleted {
        report: serde_json::Value,
    },
    TaskAborted {
        reason: String,
    },
    RestCountdown {
        seconds_remaining: u64,
        total_seconds: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PhaseChanged { .. } => "PhaseChanged",
            EventKind::PlanCreated { .. } => "PlanCreated",
            EventKind::StageStarted { .. } => "StageStarted",
            EventKind::StageCompleted { .. } => "StageCompleted",
            EventKind::WorkerStarted { .. } => "WorkerStarted",
            EventKind::WorkerProgress { .. } => "WorkerProgress",
            EventKind::WorkerCompleted { .. } => "WorkerCompleted",
            EventKind::WorkerFailed { .. } => "WorkerFailed",
            EventKind::WorkerRetrying { .. } => "WorkerRetrying",
            EventKind::SchedulingDecision { .. } => "SchedulingDecision",
            EventKind::OrchestratorCommentary { .. } => "OrchestratorCommentary",
            EventKind::WorkerCommentary { .. } => "WorkerCommentary",
            EventKind::ToolInvocation { .. } => "ToolInvocation",
            EventKind::ToolResult { .. } => "ToolResult",
            EventKind::Reasoning { .. } => "Reasoning",
            EventKind::ClarificationRequested { .. } => "ClarificationRequested",
            EventKind::ClarificationReceived { .. } => "ClarificationReceived",
            EventKind::InjectionReceived { .. } => "InjectionReceived",
            EventKind::ApprovalRequested { .. } => "ApprovalRequested",
            EventKind::ApprovalResolved { .. } => "ApprovalResolved",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskAborted { .. } => "TaskAborted",
            EventKind::RestCountdown { .. } => "RestCountdown",
        }
    }
}

/// A timestamped entry for file persistence by a collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventLogEntry {
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
