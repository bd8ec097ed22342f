//! Collaborator context handed to each driver at construction
//!
//! No process-wide statics: the LLM client, event bus, tool plumbing,
//! and persistence all arrive here.

use std::sync::Arc;

use crate::events::EventBus;
use crate::llm::LlmClient;
use crate::persist::Persistence;
use crate::tools::{ApprovalGate, SandboxedExecutor};

/// Everything a driver needs from its host
#[derive(Clone)]
pub struct DriverContext {
    pub llm: Arc<dyn LlmClient>,
    pub bus: Arc<EventBus>,
    /// Tool executor; None when the driver runs tool-less
    pub tools: Option<Arc<SandboxedExecutor>>,
    pub gate: Arc<ApprovalGate>,
    /// Persistence collaborator; None for ephemeral runs
    pub persistence: Option<Arc<dyn Persistence>>,
}

impl DriverContext {
    pub fn new(llm: Arc<dyn LlmClient>, bus: Arc<EventBus>) -> Self {
        Self {
            llm,
            bus,
            tools: None,
            gate: Arc::new(ApprovalGate::new()),
            persistence: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<SandboxedExecutor>, gate: Arc<ApprovalGate>) -> Self {
        self.tools = Some(tools);
        self.gate = gate;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }
}
