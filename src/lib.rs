//! Deskpilot - multi-agent orchestration core for a desktop AI assistant
//!
//! Deskpilot coordinates LLM agents to perform complex engineering tasks.
//! Three drivers share the same infrastructure:
//!
//! - **Team** ([`team`]): one-shot pipeline that decomposes a task into a
//!   dependency-ordered plan of work chunks, executes them in parallel
//!   stages, and synthesises a consolidated report.
//! - **Office** ([`office`]): long-running supervisor that discovers tasks,
//!   dispatches them to a bounded pool of ephemeral assistants, aggregates
//!   results, then rests on a countdown before repeating.
//! - **Panel** ([`panel`]): moderated multi-expert debate with convergence
//!   detection and guard-rail enforcement.
//!
//! # Shared infrastructure
//!
//! - [`events`] - typed pub/sub bus for lifecycle events
//! - [`phase`] - deterministic phase state machines
//! - [`retry`] / [`breaker`] - backoff and per-tool circuit breaking
//! - [`tools`] - sandboxed tool execution and the approval gate
//! - [`llm`] - provider-agnostic LLM client abstraction
//! - [`agent`] - role catalogue and single-turn agent execution
//! - [`scheduler`] - DAG layering and bounded-concurrency stage execution
//!
//! The core never talks to a model provider, a terminal, or a disk by
//! itself: the LLM transport, tool backends, and persistence arrive as
//! collaborator traits at driver construction.

pub mod agent;
pub mod breaker;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod llm;
pub mod office;
pub mod panel;
pub mod persist;
pub mod phase;
pub mod retry;
pub mod scheduler;
pub mod team;
pub mod tools;
pub mod workspace;

// Re-export commonly used types
pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{CommentaryMode, Config, Depth, OfficeSettings, PanelSettings, PanelistPreset, TeamSettings};
pub use context::DriverContext;
pub use domain::{
    AgentInstance, AgentStatus, AssistantTask, Complexity, ConvergenceResult, ConvergenceStatus, CostEstimate,
    IterationReport, OrchestrationPlan, Priority, Role, SchedulingDecision, Session, SessionMessage, TaskStatus,
    ToolCallRecord, WorkChunk,
};
pub use events::{Event, EventBus, EventEmitter, EventKind};
pub use llm::LlmClient;
pub use retry::RetryPolicy;

/// Initialise tracing for embedding binaries and tests.
///
/// Respects `RUST_LOG`; defaults to `info` for the crate and `warn`
/// elsewhere. Safe to call more than once (subsequent calls are no-ops).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,deskpilot=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
