//! Orchestrator planning calls
//!
//! The planning agent answers through one of two forced tools:
//! `ask_clarifications` while the task is unclear, `submit_plan` once it
//! can produce the chunk graph. Plain text falls back to a clarification
//! so the conversation never dead-ends.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{OrchestrationPlan, WorkChunk, generate_id};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, ToolDefinition};

/// What the planning call produced
#[derive(Debug)]
pub(crate) enum PlannerOutcome {
    /// The orchestrator needs answers before it can plan
    Questions(Vec<String>),
    /// A validated-shape plan (graph checks happen in the driver)
    Plan(OrchestrationPlan),
}

#[derive(Debug, Deserialize)]
struct QuestionsInput {
    questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanInput {
    #[serde(default)]
    id: Option<String>,
    chunks: Vec<WorkChunk>,
}

fn planner_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "ask_clarifications",
            "Ask the user focused questions when the task is too unclear to plan.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["questions"]
            }),
        ),
        ToolDefinition::new(
            "submit_plan",
            "Submit the final plan. Call once, with every chunk.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "chunks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "sequenceIndex": { "type": "integer" },
                                "title": { "type": "string" },
                                "prompt": { "type": "string", "description": "Self-contained prompt for the worker" },
                                "dependsOn": { "type": "array", "items": { "type": "string" } },
                                "workingScope": { "type": "string" },
                                "requiredSkills": { "type": "array", "items": { "type": "string" } },
                                "complexity": { "enum": ["Low", "Medium", "High"] },
                                "assignedRole": { "type": "string" }
                            },
                            "required": ["id", "sequenceIndex", "title", "prompt", "assignedRole"]
                        }
                    }
                },
                "required": ["chunks"]
            }),
        ),
    ]
}

/// One planning round against the orchestrator model
pub(crate) async fn request_plan(
    llm: &Arc<dyn LlmClient>,
    system_prompt: &str,
    history: &[Message],
    model: Option<String>,
    llm_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PlannerOutcome, LlmError> {
    let request = CompletionRequest::new(system_prompt, history.to_vec())
        .with_tools(planner_tools())
        .with_model(model);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        result = tokio::time::timeout(llm_timeout, llm.complete(request)) => match result {
            Ok(inner) => inner?,
            Err(_) => return Err(LlmError::Timeout(llm_timeout)),
        },
    };

    for call in &response.tool_calls {
        match call.name.as_str() {
            "ask_clarifications" => {
                let input: QuestionsInput = serde_json::from_value(call.input.clone())
                    .map_err(|e| LlmError::InvalidResponse(format!("bad clarification payload: {}", e)))?;
                debug!(count = input.questions.len(), "planner asked clarifications");
                return Ok(PlannerOutcome::Questions(input.questions));
            }
            "submit_plan" => {
                let input: PlanInput = serde_json::from_value(call.input.clone())
                    .map_err(|e| LlmError::InvalidResponse(format!("bad plan payload: {}", e)))?;
                let id = input.id.unwrap_or_else(|| generate_id("plan", "team"));
                debug!(plan_id = %id, chunks = input.chunks.len(), "planner submitted plan");
                return Ok(PlannerOutcome::Plan(OrchestrationPlan::new(id, input.chunks)));
            }
            other => {
                debug!(tool = other, "planner called unexpected tool, ignoring");
            }
        }
    }

    // Plain text keeps the clarification conversation going
    match response.content {
        Some(text) if !text.trim().is_empty() => Ok(PlannerOutcome::Questions(vec![text])),
        _ => Err(LlmError::InvalidResponse("planner returned neither tool call nor text".into())),
    }
}
