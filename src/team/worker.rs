//! Chunk execution for the Team driver

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::{AgentHandle, AgentInput, PromptContext, render_prompt, role_config};
use crate::config::TeamSettings;
use crate::domain::{CostTracker, WorkChunk};
use crate::events::EventEmitter;
use crate::llm::{LlmClient, LlmError, Message};
use crate::scheduler::{ChunkFailure, ChunkWorker};
use crate::tools::{ApprovalGate, SandboxedExecutor};
use crate::workspace::WorkspaceManager;

/// Runs one chunk: workspace lease, role-configured agent, one turn
pub(crate) struct TeamChunkWorker {
    pub llm: Arc<dyn LlmClient>,
    pub settings: TeamSettings,
    pub executor: Option<Arc<SandboxedExecutor>>,
    pub gate: Arc<ApprovalGate>,
    pub emitter: EventEmitter,
    pub workspace: Arc<WorkspaceManager>,
    pub cost: Arc<CostTracker>,
}

#[async_trait]
impl ChunkWorker for TeamChunkWorker {
    async fn run_chunk(
        &self,
        chunk: &WorkChunk,
        attempt: u32,
        prior_error: Option<String>,
        injected: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<String, ChunkFailure> {
        let lease = self
            .workspace
            .acquire(&chunk.id, chunk.working_scope.as_deref())
            .await
            .map_err(|e| ChunkFailure::Error(format!("workspace: {}", e)))?;

        let mut config = role_config(chunk.assigned_role);
        if let Some(over) = self.settings.role_configs.get(chunk.assigned_role.name()) {
            config = config.merged_with(over);
        }
        if config.model_override.is_none() {
            config.model_override = self.settings.worker_model.clone();
        }

        let mut ctx = PromptContext::for_task(&chunk.prompt).with_injected(injected);
        if let Some(path) = &lease.path {
            ctx = ctx.with_working_dir(path.display().to_string());
        }
        if let Some(error) = prior_error {
            ctx = ctx.with_prior_error(error);
        }
        let system_prompt = render_prompt(&config.system_prompt, &ctx)
            .map_err(|e| ChunkFailure::Error(format!("prompt render: {}", e)))?;

        let model = config
            .model_override
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let mut agent = AgentHandle::new(format!("worker-{}", chunk.id), config, self.llm.clone(), self.emitter.clone());
        if let Some(executor) = &self.executor {
            agent = agent.with_tools(executor.clone(), self.gate.clone());
        }

        debug!(chunk = %chunk.id, attempt, "running chunk agent");
        let input = AgentInput::new(system_prompt, vec![Message::user(chunk.prompt.clone())], attempt + 1);
        let result = agent.process(input, &cancel).await;
        agent.dispose();

        let release = self.workspace.release(lease).await;
        if let Err(e) = release {
            debug!(chunk = %chunk.id, error = %e, "workspace release failed");
        }

        match result {
            Ok(output) => {
                self.cost.record_turn(
                    output.usage.input_tokens,
                    output.usage.output_tokens,
                    output.usage.cost_usd(&model),
                );
                Ok(output.message)
            }
            Err(LlmError::Cancelled) => Err(ChunkFailure::Cancelled),
            Err(e) => Err(ChunkFailure::Error(e.to_string())),
        }
    }
}
