//! Domain types shared across the three drivers
//!
//! Everything here is plain data: sessions, messages, plans, tasks, and
//! the value types that flow through events. Drivers own the mutation
//! paths; everything else observes snapshots.

mod agent;
mod chunk;
mod convergence;
mod cost;
mod id;
mod message;
mod priority;
mod role;
mod session;
mod task;

pub use agent::{AgentInstance, AgentStatus};
pub use chunk::{ChunkResult, ChunkStatus, Complexity, OrchestrationPlan, PlanStatus, WorkChunk};
pub use convergence::{ConvergenceResult, ConvergenceStatus};
pub use cost::{CostEstimate, CostTracker};
pub use id::{DomainId, generate_id};
pub use message::{AuthorRole, MessageType, SessionMessage, ToolCallRecord};
pub use priority::Priority;
pub use role::Role;
pub use session::{GuardRailBreach, GuardRails, Session};
pub use task::{AssistantTask, IterationReport, SchedulingDecision, TaskStatus};
