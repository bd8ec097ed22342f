//! Tool collaborator interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::ToolError;
use crate::llm::ToolDefinition;

/// Description of one available tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    /// Tool cannot mutate anything; eligible for auto-approval
    #[serde(default)]
    pub read_only: bool,
}

impl ToolDescriptor {
    /// Convert to the definition shape offered to the model
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name.clone(), self.description.clone(), self.parameter_schema.clone())
    }
}

/// The tool backend the core invokes against
///
/// Implementations (PTY commands, MCP servers, built-ins) live outside
/// the core. `invoke` must honour the cancellation token promptly.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, name: &str, args: &serde_json::Value, cancel: &CancellationToken)
    -> Result<String, ToolError>;
}
