//! Agent execution layer
//!
//! An [`AgentHandle`] binds an [`AgentInstance`](crate::domain::AgentInstance)
//! to an LLM client, a role config, and (optionally) the sandboxed tool
//! executor plus approval gate. `process` runs one logical turn: a
//! completion call plus the inner tool loop until the model ends its turn.

mod handle;
mod prompts;
mod roles;

pub use handle::{AgentHandle, AgentInput, AgentOutput};
pub use prompts::{PromptContext, render_prompt};
pub use roles::{RoleConfig, RoleOverride, role_config};
