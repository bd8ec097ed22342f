//! Agent handle - one logical turn against the LLM with tool routing

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::roles::RoleConfig;
use crate::domain::{AgentInstance, AgentStatus, Role, ToolCallRecord};
use crate::events::EventEmitter;
use crate::llm::{
    CompletionRequest, CompletionResponse, ContentBlock, LlmClient, LlmError, Message, StopReason, StreamChunk,
    TokenUsage,
};
use crate::tools::{ApprovalGate, SandboxedExecutor};

/// Everything one `process` call needs
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// Rendered system prompt for this turn
    pub system_prompt: String,
    /// Conversation so far, oldest first
    pub history: Vec<Message>,
    /// Turn number within the session
    pub turn: u32,
    pub max_tokens: u32,
}

impl AgentInput {
    pub fn new(system_prompt: impl Into<String>, history: Vec<Message>, turn: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
            turn,
            max_tokens: 8_192,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Result of one `process` call
#[derive(Debug)]
pub struct AgentOutput {
    /// Final text the agent produced
    pub message: String,
    /// Tool calls executed during the turn, in order
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool calls the model asked for, including any dropped past the
    /// per-turn cap
    pub tool_calls_requested: u32,
    /// The model hit its token cap and wants to continue
    pub requests_more_turns: bool,
    /// Internal reasoning, when the model surfaced any
    pub reasoning: Option<String>,
    /// Token usage summed over all inner rounds
    pub usage: TokenUsage,
    /// Updated history including this turn's messages
    pub history: Vec<Message>,
}

/// An agent bound to its model, role config, and tool plumbing
pub struct AgentHandle {
    instance: AgentInstance,
    config: RoleConfig,
    llm: Arc<dyn LlmClient>,
    executor: Option<Arc<SandboxedExecutor>>,
    gate: Option<Arc<ApprovalGate>>,
    emitter: EventEmitter,
    /// Cap on LLM round-trips within one `process` call
    max_tool_rounds: u32,
    /// Cap on tool calls executed per turn
    max_tool_calls_per_turn: u32,
    /// Stream tokens as commentary events instead of buffering
    streaming: bool,
}

impl AgentHandle {
    pub fn new(display_name: impl Into<String>, config: RoleConfig, llm: Arc<dyn LlmClient>, emitter: EventEmitter) -> Self {
        let model = config.model_override.clone().unwrap_or_else(|| "default".to_string());
        Self {
            instance: AgentInstance::new(display_name, config.role, model),
            config,
            llm,
            executor: None,
            gate: None,
            emitter,
            max_tool_rounds: 8,
            max_tool_calls_per_turn: 5,
            streaming: false,
        }
    }

    /// Attach the sandboxed executor and approval gate
    pub fn with_tools(mut self, executor: Arc<SandboxedExecutor>, gate: Arc<ApprovalGate>) -> Self {
        self.executor = Some(executor);
        self.gate = Some(gate);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_max_tool_calls_per_turn(mut self, cap: u32) -> Self {
        self.max_tool_calls_per_turn = cap;
        self
    }

    pub fn instance(&self) -> &AgentInstance {
        &self.instance
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn turns_completed(&self) -> u32 {
        self.instance.turns_completed
    }

    /// Release the agent; a disposed agent never produces output again
    pub fn dispose(&mut self) {
        self.instance.set_status(AgentStatus::Disposed);
    }

    pub fn pause(&mut self) {
        self.instance.set_status(AgentStatus::Paused);
    }

    pub fn resume(&mut self) {
        self.instance.set_status(AgentStatus::Active);
    }

    /// Run one logical turn: completion plus the inner tool loop
    pub async fn process(&mut self, input: AgentInput, cancel: &CancellationToken) -> Result<AgentOutput, LlmError> {
        if self.instance.is_disposed() {
            return Err(LlmError::Disposed);
        }
        self.instance.set_status(AgentStatus::Active);
        self.instance.set_status(AgentStatus::Thinking);

        let tool_defs = match &self.executor {
            Some(executor) => executor.definitions_for(&self.config.preferred_tools),
            None => Vec::new(),
        };

        let mut messages = input.history;
        let mut usage = TokenUsage::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut tool_calls_requested = 0u32;
        let mut requests_more_turns = false;
        let mut final_text = String::new();
        let mut rounds = 0u32;

        loop {
            rounds += 1;
            if rounds > self.max_tool_rounds {
                warn!(agent = %self.instance.id, "inner tool loop hit round cap");
                break;
            }

            let request = CompletionRequest::new(input.system_prompt.clone(), messages.clone())
                .with_tools(tool_defs.clone())
                .with_max_tokens(input.max_tokens)
                .with_model(self.config.model_override.clone())
                .with_temperature(self.config.temperature);

            let response = self.call_llm(request, cancel).await?;
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;

            if let Some(text) = &response.content {
                final_text = text.clone();
            }
            messages.push(build_assistant_message(&response));

            match response.stop_reason {
                StopReason::EndTurn | StopReason::StopSequence => break,
                StopReason::MaxTokens => {
                    requests_more_turns = true;
                    break;
                }
                StopReason::ToolUse => {
                    tool_calls_requested += response.tool_calls.len() as u32;
                    let results = self.run_tools(&response, &mut records, cancel).await;
                    if results.is_empty() {
                        break;
                    }
                    messages.push(Message::user_blocks(results));
                    self.emitter.emit(crate::events::EventKind::WorkerProgress {
                        worker_id: self.instance.id.clone(),
                        activity: format!("{} tool calls executed", records.len()),
                        progress_pct: ((rounds * 100) / self.max_tool_rounds.max(1)).min(100) as u8,
                    });
                }
            }
        }

        self.instance.set_status(AgentStatus::Contributed);
        self.instance.record_turn();

        Ok(AgentOutput {
            message: final_text,
            tool_calls: records,
            tool_calls_requested,
            requests_more_turns,
            reasoning: None,
            usage,
            history: messages,
        })
    }

    /// Execute the response's tool calls through the gate and executor
    async fn run_tools(
        &self,
        response: &CompletionResponse,
        records: &mut Vec<ToolCallRecord>,
        cancel: &CancellationToken,
    ) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        for (index, call) in response.tool_calls.iter().enumerate() {
            if index as u32 >= self.max_tool_calls_per_turn {
                warn!(agent = %self.instance.id, "tool call cap reached, dropping remaining calls");
                break;
            }
            let args_summary = summarise_args(&call.input);
            self.emitter.tool_invocation(&self.instance.id, &call.name, &args_summary);

            let record = match (&self.executor, &self.gate) {
                (Some(executor), Some(gate)) => {
                    let decision = gate
                        .check(self.emitter.session_id(), &call.name, &args_summary, &self.emitter, cancel)
                        .await;
                    if decision.approved {
                        executor.execute(&call.name, call.input.clone(), cancel).await
                    } else {
                        ToolCallRecord::failed(&call.name, call.input.clone(), decision.reason, 0)
                    }
                }
                (Some(executor), None) => executor.execute(&call.name, call.input.clone(), cancel).await,
                _ => ToolCallRecord::failed(&call.name, call.input.clone(), "no tool executor attached", 0),
            };

            self.emitter.tool_result(
                &self.instance.id,
                &record.tool,
                record.success,
                &summarise_text(&record.output),
                record.duration_ms,
            );
            blocks.push(ContentBlock::tool_result(
                call.id.clone(),
                record.output.clone(),
                !record.success,
            ));
            records.push(record);
        }
        blocks
    }

    /// One LLM call, honouring cancellation and the streaming mode
    async fn call_llm(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        if !self.streaming {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                response = self.llm.complete(request) => response,
            };
        }

        let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
        let call = self.llm.stream(request, tx);
        tokio::pin!(call);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                response = &mut call => {
                    // Drain anything the channel still holds
                    while let Ok(chunk) = rx.try_recv() {
                        if let StreamChunk::TextDelta(text) = chunk {
                            self.emit_commentary(text);
                        }
                    }
                    return response;
                }
                chunk = rx.recv() => {
                    match chunk {
                        Some(StreamChunk::TextDelta(text)) => self.emit_commentary(text),
                        Some(_) => {}
                        // Stream closed; only the final response remains
                        None => {
                            return tokio::select! {
                                biased;
                                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                                response = &mut call => response,
                            };
                        }
                    }
                }
            }
        }
    }

    fn emit_commentary(&self, text: String) {
        self.emitter.emit(crate::events::EventKind::WorkerCommentary {
            agent_id: self.instance.id.clone(),
            text,
        });
    }
}

fn build_assistant_message(response: &CompletionResponse) -> Message {
    let mut blocks = Vec::new();
    if let Some(text) = &response.content {
        blocks.push(ContentBlock::text(text));
    }
    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }
    Message::assistant_blocks(blocks)
}

/// First ~120 chars of the JSON args, for event summaries
fn summarise_args(input: &serde_json::Value) -> String {
    summarise_text(&input.to_string())
}

fn summarise_text(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut cut = LIMIT;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::agent::roles::role_config;
    use crate::events::EventBus;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::ToolCall;
    use crate::tools::{ApprovalGate, ExecutorConfig, SandboxedExecutor, ToolDescriptor, ToolError, ToolProvider};

    struct EchoProvider;

    #[async_trait]
    impl ToolProvider for EchoProvider {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "fs.read".into(),
                description: "Read".into(),
                parameter_schema: serde_json::json!({"type": "object"}),
                read_only: true,
            }]
        }

        async fn invoke(
            &self,
            _name: &str,
            args: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String, ToolError> {
            Ok(format!("echo: {}", args))
        }
    }

    fn tool_use_response(tool: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some("let me check".into()),
            tool_calls: vec![ToolCall {
                id: "t1".into(),
                name: tool.into(),
                input: serde_json::json!({"path": "/a"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }
    }

    fn handle_with(llm: Arc<dyn LlmClient>) -> AgentHandle {
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("s1");
        AgentHandle::new("worker", role_config(Role::CodeAnalysis), llm, emitter)
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse::text("all done").with_usage(100, 20),
        ]));
        let mut handle = handle_with(llm);

        let output = handle
            .process(
                AgentInput::new("sys", vec![Message::user("go")], 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.message, "all done");
        assert!(output.tool_calls.is_empty());
        assert!(!output.requests_more_turns);
        assert_eq!(output.usage.total(), 120);
        assert_eq!(handle.turns_completed(), 1);
        assert_eq!(handle.instance().status, AgentStatus::Contributed);
    }

    #[tokio::test]
    async fn test_tool_loop_executes_and_feeds_back() {
        let llm = Arc::new(MockLlmClient::new(vec![
            tool_use_response("fs.read"),
            CompletionResponse::text("file says hello").with_usage(20, 10),
        ]));
        let executor = Arc::new(SandboxedExecutor::new(Arc::new(EchoProvider), ExecutorConfig::default()));
        let gate = Arc::new(ApprovalGate::new().with_auto_approved(vec!["fs.read".to_string()]));

        let mut handle = handle_with(llm).with_tools(executor, gate);
        let output = handle
            .process(
                AgentInput::new("sys", vec![Message::user("read /a")], 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.message, "file says hello");
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(output.tool_calls_requested, 1);
        assert!(output.tool_calls[0].success);
        assert!(output.tool_calls[0].output.contains("echo"));
        // history: user, assistant(tool_use), user(tool_result), assistant(text)
        assert_eq!(output.history.len(), 4);
    }

    #[tokio::test]
    async fn test_requested_count_includes_calls_past_the_cap() {
        let many_calls = CompletionResponse {
            content: Some("burst".into()),
            tool_calls: (0..7)
                .map(|i| ToolCall {
                    id: format!("t{}", i),
                    name: "fs.read".into(),
                    input: serde_json::json!({"path": format!("/f{}", i)}),
                })
                .collect(),
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        };
        let llm = Arc::new(MockLlmClient::new(vec![
            many_calls,
            CompletionResponse::text("done").with_usage(5, 5),
        ]));
        let executor = Arc::new(SandboxedExecutor::new(Arc::new(EchoProvider), ExecutorConfig::default()));
        let gate = Arc::new(ApprovalGate::new().with_auto_approved(vec!["fs.read".to_string()]));

        let mut handle = handle_with(llm).with_tools(executor, gate);
        let output = handle
            .process(
                AgentInput::new("sys", vec![Message::user("read everything")], 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Five executed under the cap, seven requested
        assert_eq!(output.tool_calls.len(), 5);
        assert_eq!(output.tool_calls_requested, 7);
    }

    #[tokio::test]
    async fn test_denied_tool_surfaces_as_failed_record() {
        let llm = Arc::new(MockLlmClient::new(vec![
            tool_use_response("fs.read"),
            CompletionResponse::text("could not read").with_usage(5, 5),
        ]));
        let executor = Arc::new(SandboxedExecutor::new(Arc::new(EchoProvider), ExecutorConfig::default()));
        let gate = Arc::new(ApprovalGate::new());
        gate.add_rule(crate::tools::ApprovalRule {
            tool_pattern: "fs.read".into(),
            approved: false,
            scope: crate::tools::ApprovalScope::Global,
            session_id: None,
            created_at: chrono::Utc::now(),
        });

        let mut handle = handle_with(llm).with_tools(executor, gate);
        let output = handle
            .process(
                AgentInput::new("sys", vec![Message::user("read /a")], 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.tool_calls.len(), 1);
        assert!(!output.tool_calls[0].success);
        assert!(output.tool_calls[0].output.contains("rule"));
    }

    #[tokio::test]
    async fn test_disposed_agent_refuses() {
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse::text("never")]));
        let mut handle = handle_with(llm);
        handle.dispose();

        let result = handle
            .process(AgentInput::new("sys", vec![], 1), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LlmError::Disposed)));
    }

    #[tokio::test]
    async fn test_max_tokens_requests_more_turns() {
        let truncated = CompletionResponse {
            content: Some("partial...".into()),
            tool_calls: vec![],
            stop_reason: StopReason::MaxTokens,
            usage: TokenUsage::default(),
        };
        let llm = Arc::new(MockLlmClient::new(vec![truncated]));
        let mut handle = handle_with(llm);

        let output = handle
            .process(AgentInput::new("sys", vec![], 1), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.requests_more_turns);
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse::text("x")]));
        let mut handle = handle_with(llm);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = handle.process(AgentInput::new("sys", vec![], 1), &cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }

    #[test]
    fn test_summarise_args() {
        let short = summarise_args(&serde_json::json!({"a": 1}));
        assert_eq!(short, "{\"a\":1}");
        let long = summarise_text(&"y".repeat(300));
        assert!(long.len() < 300);
        assert!(long.ends_with('…'));
    }
}
