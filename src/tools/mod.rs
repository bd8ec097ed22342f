//! Tool execution
//!
//! The tool collaborator exposes `list_tools`/`invoke`; the sandboxed
//! executor wraps every invocation with a timeout, an output cap, a
//! per-tool circuit breaker, and the retry policy. The approval gate
//! decides whether an agent may call a tool at all.

pub mod approval;
mod error;
mod executor;
mod provider;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalResponse, ApprovalRule, ApprovalScope};
pub use error::ToolError;
pub use executor::{ExecutorConfig, SandboxedExecutor};
pub use provider::{ToolDescriptor, ToolProvider};
