//! Manager agent calls for the office loop

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::Priority;
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, ToolDefinition};

/// One task the manager wants done
#[derive(Debug, Clone)]
pub(crate) struct TaskSpec {
    pub instruction: String,
    pub priority: Priority,
    /// Iterations to wait before this task becomes eligible
    pub defer_iterations: u64,
}

/// What a fetch call produced
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// Prioritised task list; may be empty
    Tasks(Vec<TaskSpec>),
    /// The manager needs answers before it can plan work
    Questions(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct TaskListInput {
    tasks: Vec<TaskInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskInput {
    instruction: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    defer_iterations: u64,
}

#[derive(Debug, Deserialize)]
struct QuestionsInput {
    questions: Vec<String>,
}

fn manager_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "submit_tasks",
            "Submit the prioritised task list for this iteration. An empty list means no work.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "instruction": { "type": "string" },
                                "priority": { "enum": ["low", "normal", "high"] },
                                "deferIterations": { "type": "integer", "minimum": 0 }
                            },
                            "required": ["instruction"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        ),
        ToolDefinition::new(
            "ask_clarifications",
            "Ask the user questions; answers arrive before the next iteration.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "questions": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["questions"]
            }),
        ),
    ]
}

async fn call_with_timeout(
    llm: &Arc<dyn LlmClient>,
    request: CompletionRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<crate::llm::CompletionResponse, LlmError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = tokio::time::timeout(timeout, llm.complete(request)) => match result {
            Ok(inner) => inner,
            Err(_) => Err(LlmError::Timeout(timeout)),
        },
    }
}

/// Ask the manager for this iteration's task list
pub(crate) async fn fetch_tasks(
    llm: &Arc<dyn LlmClient>,
    system_prompt: &str,
    user_prompt: &str,
    model: Option<String>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, LlmError> {
    let request = CompletionRequest::new(system_prompt, vec![Message::user(user_prompt)])
        .with_tools(manager_tools())
        .with_model(model);

    let response = call_with_timeout(llm, request, timeout, cancel).await?;

    for call in &response.tool_calls {
        match call.name.as_str() {
            "submit_tasks" => {
                let input: TaskListInput = serde_json::from_value(call.input.clone())
                    .map_err(|e| LlmError::InvalidResponse(format!("bad task list: {}", e)))?;
                let tasks = input
                    .tasks
                    .into_iter()
                    .map(|t| TaskSpec {
                        instruction: t.instruction,
                        priority: t.priority.as_deref().map(Priority::parse_lenient).unwrap_or_default(),
                        defer_iterations: t.defer_iterations,
                    })
                    .collect::<Vec<_>>();
                debug!(count = tasks.len(), "manager submitted tasks");
                return Ok(FetchOutcome::Tasks(tasks));
            }
            "ask_clarifications" => {
                let input: QuestionsInput = serde_json::from_value(call.input.clone())
                    .map_err(|e| LlmError::InvalidResponse(format!("bad questions: {}", e)))?;
                return Ok(FetchOutcome::Questions(input.questions));
            }
            other => debug!(tool = other, "manager called unexpected tool, ignoring"),
        }
    }

    // Plain text means the manager had nothing actionable
    debug!("manager returned no tool call, treating as no work");
    Ok(FetchOutcome::Tasks(Vec::new()))
}

/// Ask the manager to propose (or revise) the standing plan
pub(crate) async fn propose_plan(
    llm: &Arc<dyn LlmClient>,
    objective: &str,
    feedback: &[String],
    model: Option<String>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    let mut prompt = format!(
        "Objective:\n{}\n\nPropose a short standing plan for how you will supervise \
         this workspace, iteration by iteration.",
        objective
    );
    for item in feedback {
        prompt.push_str(&format!("\n\nUser feedback on the previous proposal: {}", item));
    }

    let request = CompletionRequest::new(
        "You are an office manager. Answer with the plan text only.",
        vec![Message::user(prompt)],
    )
    .with_model(model);

    let response = call_with_timeout(llm, request, timeout, cancel).await?;
    response
        .content
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("empty plan proposal".into()))
}
