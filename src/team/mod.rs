//! Team orchestrator driver
//!
//! One-shot pipeline: Clarify -> Plan -> Approve -> Execute -> Synthesise.
//! The orchestrator agent decomposes the task into a dependency-ordered
//! plan of chunks; the DAG scheduler runs them in parallel stages; a
//! synthesis agent folds the worker results into a consolidated report.

mod planner;
mod report;
mod worker;

pub use report::{ConsolidatedReport, extract_action_markers};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentHandle, AgentInput, PromptContext, render_prompt, role_config};
use crate::config::TeamSettings;
use crate::context::DriverContext;
use crate::domain::{
    AuthorRole, CostTracker, GuardRails, MessageType, OrchestrationPlan, Role, Session, SessionMessage, generate_id,
};
use crate::events::EventEmitter;
use crate::llm::{LlmError, Message};
use crate::phase::{PhaseMachine, TeamPhase, TeamTrigger, team_machine};
use crate::scheduler::{ExecutionSummary, StageRunner, build_stages};
use crate::tools::{ApprovalRule, ApprovalScope};
use crate::workspace::{WorkspaceConfig, WorkspaceManager};

use planner::PlannerOutcome;
use worker::TeamChunkWorker;

/// Commands the UI sends into a running Team session
#[derive(Debug)]
pub enum TeamCommand {
    UserMessage { text: String, correlation: String },
    ApprovePlan { correlation: String },
    RejectPlan { reason: String, correlation: String },
    Inject { instruction: String, correlation: String },
    /// The one-shot pipeline has no pause point; logged and swallowed
    Pause { correlation: String },
    Resume { correlation: String },
    Stop { correlation: String },
    /// Return a finished session to Idle
    Reset { correlation: String },
}

/// Client handle for a running Team session
#[derive(Clone)]
pub struct TeamHandle {
    tx: mpsc::Sender<TeamCommand>,
    session_id: String,
    cancel: CancellationToken,
}

impl TeamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, command: TeamCommand) {
        // A closed channel means the driver already terminated; commands
        // against a finished session are no-ops.
        let _ = self.tx.send(command).await;
    }

    pub async fn send_user_message(&self, text: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "message");
        self.send(TeamCommand::UserMessage {
            text: text.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn approve_plan(&self) -> String {
        let correlation = generate_id("cmd", "approve");
        self.send(TeamCommand::ApprovePlan {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn reject_plan(&self, reason: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "reject");
        self.send(TeamCommand::RejectPlan {
            reason: reason.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn inject_instruction(&self, instruction: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "inject");
        self.send(TeamCommand::Inject {
            instruction: instruction.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn pause(&self) -> String {
        let correlation = generate_id("cmd", "pause");
        self.send(TeamCommand::Pause {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn resume(&self) -> String {
        let correlation = generate_id("cmd", "resume");
        self.send(TeamCommand::Resume {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn reset(&self) -> String {
        let correlation = generate_id("cmd", "reset");
        self.send(TeamCommand::Reset {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    /// Stop the session; idempotent
    pub async fn stop(&self) -> String {
        let correlation = generate_id("cmd", "stop");
        self.cancel.cancel();
        self.send(TeamCommand::Stop {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }
}

/// The Team driver; [`start`](TeamDriver::start) spawns the run loop
pub struct TeamDriver;

impl TeamDriver {
    pub fn start(prompt: impl Into<String>, settings: TeamSettings, ctx: DriverContext) -> TeamHandle {
        let prompt = prompt.into();
        let session = Session::new(&prompt, GuardRails::default());
        let session_id = session.id.clone();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);

        let run = TeamRun {
            settings,
            ctx,
            session,
            machine: team_machine(),
            cancel: cancel.clone(),
            cost: Arc::new(CostTracker::new()),
        };
        tokio::spawn(run.run(prompt, rx));

        TeamHandle {
            tx,
            session_id,
            cancel,
        }
    }
}

struct TeamRun {
    settings: TeamSettings,
    ctx: DriverContext,
    session: Session,
    machine: PhaseMachine<TeamPhase, TeamTrigger>,
    cancel: CancellationToken,
    cost: Arc<CostTracker>,
}

impl TeamRun {
    fn emitter(&self) -> EventEmitter {
        self.ctx.bus.emitter_for(&self.session.id)
    }

    /// Fire a trigger, emitting PhaseChanged on a real transition
    fn fire(&mut self, trigger: TeamTrigger, reason: &str, correlation: Option<&str>) {
        if let Some(transition) = self.machine.fire(trigger) {
            self.session.set_phase(transition.to.to_string());
            self.emitter()
                .phase_changed(transition.from.to_string(), transition.to.to_string(), reason, correlation);
        }
    }

    fn append_message(&mut self, author: AuthorRole, kind: MessageType, content: &str) {
        let message = SessionMessage::new(&self.session.id, None, author, kind, content);
        self.session.append_message(message);
    }

    /// Session-scoped approvals for tools the provider declares read-only
    fn seed_read_only_rules(&self) {
        if !self.settings.auto_approve_read_only_tools {
            return;
        }
        let Some(executor) = &self.ctx.tools else { return };
        for tool in executor.read_only_tools() {
            self.ctx.gate.add_rule(ApprovalRule {
                tool_pattern: tool,
                approved: true,
                scope: ApprovalScope::Session,
                session_id: Some(self.session.id.clone()),
                created_at: chrono::Utc::now(),
            });
        }
    }

    async fn run(mut self, prompt: String, mut rx: mpsc::Receiver<TeamCommand>) {
        info!(session = %self.session.id, "team session starting");
        self.append_message(AuthorRole::User, MessageType::UserMessage, &prompt);
        self.fire(TeamTrigger::UserSubmitted, "user submitted task", None);
        self.seed_read_only_rules();

        let mut history = vec![Message::user(prompt.clone())];

        // Clarify/plan/approve can loop on rejection
        let plan = loop {
            let Some(plan) = self.clarify_until_plan(&mut history, &mut rx).await else {
                return;
            };

            self.emitter().plan_created(&plan.id, plan.chunks.len());
            match serde_json::to_string(&plan) {
                Ok(json) => self.append_message(AuthorRole::Head, MessageType::Plan, &json),
                Err(e) => warn!(error = %e, "plan serialisation failed"),
            }
            self.fire(TeamTrigger::PlanProposed, "plan ready for approval", None);

            match self.await_approval(&mut history, &mut rx).await {
                Approval::Approved => break plan,
                Approval::Rejected => continue,
                Approval::Terminated => return,
            }
        };

        // A plan with no chunks completes immediately with an empty report
        if plan.is_empty() {
            self.fire(TeamTrigger::StagesReady, "empty plan", None);
            self.fire(TeamTrigger::ExecutionFinished, "nothing to execute", None);
            let report = ConsolidatedReport {
                summary: String::new(),
                next_steps: Vec::new(),
                succeeded_chunks: 0,
                failed_chunks: 0,
                cancelled_chunks: 0,
                worker_results: Vec::new(),
                cost: self.cost.snapshot(),
            };
            match serde_json::to_value(&report) {
                Ok(json) => self.emitter().task_completed(json),
                Err(e) => warn!(error = %e, "report serialisation failed"),
            }
            self.fire(TeamTrigger::SynthesisComplete, "empty report delivered", None);
            self.session.complete();
            self.persist_session().await;
            if self.settings.maintain_follow_up_context {
                self.follow_up_loop(&mut history, &mut rx).await;
            }
            return;
        }

        // Planning: validate the graph and layer it
        if let Err(e) = build_stages(&plan) {
            self.fail(&format!("invalid plan: {}", e));
            return;
        }
        self.fire(TeamTrigger::StagesReady, "stages layered", None);

        // Executing
        let summary = match self.execute(&plan, &mut rx).await {
            Some(summary) => summary,
            None => return,
        };

        if self.cancel.is_cancelled() {
            self.abort_cancelled("stopped during execution");
            return;
        }
        if summary.aborted {
            self.fail("abort threshold reached during execution");
            return;
        }
        self.fire(TeamTrigger::ExecutionFinished, "all stages finished", None);

        // Synthesising
        let report = match self.synthesise(&summary).await {
            Ok(report) => report,
            Err(LlmError::Cancelled) => {
                self.abort_cancelled("stopped during synthesis");
                return;
            }
            Err(e) => {
                self.fail(&format!("synthesis failed: {}", e));
                return;
            }
        };

        self.append_message(AuthorRole::Head, MessageType::Synthesis, &report.summary);
        history.push(Message::assistant(report.summary.clone()));
        match serde_json::to_value(&report) {
            Ok(json) => self.emitter().task_completed(json),
            Err(e) => warn!(error = %e, "report serialisation failed"),
        }
        self.fire(TeamTrigger::SynthesisComplete, "report delivered", None);
        self.session.complete();
        self.persist_session().await;

        // Follow-up: answer questions about the report from history
        if self.settings.maintain_follow_up_context {
            self.follow_up_loop(&mut history, &mut rx).await;
        }
        info!(session = %self.session.id, "team session finished");
    }

    /// Clarification loop; returns None when the session terminated
    async fn clarify_until_plan(
        &mut self,
        history: &mut Vec<Message>,
        rx: &mut mpsc::Receiver<TeamCommand>,
    ) -> Option<OrchestrationPlan> {
        let planning_config = role_config(Role::Planning);
        let system_prompt = render_prompt(&planning_config.system_prompt, &PromptContext::for_task(&self.session.prompt))
            .unwrap_or_else(|_| planning_config.system_prompt.clone());
        let mut transient_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.abort_cancelled("stopped while clarifying");
                return None;
            }

            let outcome = planner::request_plan(
                &self.ctx.llm,
                &system_prompt,
                history,
                self.settings.orchestrator_model.clone(),
                self.settings.orchestrator_llm_timeout(),
                &self.cancel,
            )
            .await;

            match outcome {
                Ok(PlannerOutcome::Plan(plan)) => return Some(plan),
                Ok(PlannerOutcome::Questions(questions)) => {
                    self.append_message(AuthorRole::Head, MessageType::Clarification, &questions.join("\n"));
                    history.push(Message::assistant(questions.join("\n")));
                    self.emitter().clarification_requested(questions);

                    if !self.wait_for_answer(history, rx).await {
                        return None;
                    }
                }
                Err(LlmError::Cancelled) => {
                    self.abort_cancelled("stopped while clarifying");
                    return None;
                }
                Err(LlmError::InvalidResponse(e)) => {
                    debug!(error = %e, "planner output invalid, asking to resubmit");
                    history.push(Message::user(format!(
                        "Your last submission was invalid ({}). Ask clarifying questions or resubmit the plan.",
                        e
                    )));
                }
                Err(e) if e.is_retryable() && transient_failures < self.settings.retry.max_retries => {
                    transient_failures += 1;
                    let delay = self.settings.retry.delay_for_attempt(transient_failures - 1);
                    warn!(error = %e, ?delay, "planner call failed, retrying");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            self.abort_cancelled("stopped while clarifying");
                            return None;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    self.fail(&format!("orchestrator call failed: {}", e));
                    return None;
                }
            }
        }
    }

    /// Wait for the user's clarification answer; false = terminated
    async fn wait_for_answer(&mut self, history: &mut Vec<Message>, rx: &mut mpsc::Receiver<TeamCommand>) -> bool {
        loop {
            match rx.recv().await {
                Some(TeamCommand::UserMessage { text, correlation }) => {
                    self.append_message(AuthorRole::User, MessageType::UserMessage, &text);
                    history.push(Message::user(text.clone()));
                    self.emitter().clarification_received(&text, Some(&correlation));
                    return true;
                }
                Some(TeamCommand::Inject { instruction, correlation }) => {
                    self.emitter().injection_received(&instruction, Some(&correlation));
                    history.push(Message::user(format!("Additional instruction: {}", instruction)));
                }
                Some(TeamCommand::Stop { correlation }) => {
                    self.cancel.cancel();
                    self.fire(TeamTrigger::UserCancelled, "user stopped", Some(&correlation));
                    self.emitter().task_aborted("stopped by user");
                    return false;
                }
                Some(other) => debug!(?other, "command ignored while clarifying"),
                None => {
                    self.abort_cancelled("handle dropped");
                    return false;
                }
            }
        }
    }

    async fn await_approval(&mut self, history: &mut Vec<Message>, rx: &mut mpsc::Receiver<TeamCommand>) -> Approval {
        loop {
            match rx.recv().await {
                Some(TeamCommand::ApprovePlan { correlation }) => {
                    self.fire(TeamTrigger::UserApproved, "plan approved", Some(&correlation));
                    return Approval::Approved;
                }
                Some(TeamCommand::RejectPlan { reason, correlation }) => {
                    self.fire(TeamTrigger::UserRejected, "plan rejected", Some(&correlation));
                    history.push(Message::user(format!("The plan was rejected: {}. Revise it.", reason)));
                    return Approval::Rejected;
                }
                Some(TeamCommand::UserMessage { text, correlation }) => {
                    self.append_message(AuthorRole::User, MessageType::UserMessage, &text);
                    history.push(Message::user(text.clone()));
                    self.emitter().clarification_received(&text, Some(&correlation));
                }
                Some(TeamCommand::Inject { instruction, correlation }) => {
                    self.emitter().injection_received(&instruction, Some(&correlation));
                    history.push(Message::user(format!("Additional instruction: {}", instruction)));
                }
                Some(TeamCommand::Stop { correlation }) => {
                    self.cancel.cancel();
                    self.fire(TeamTrigger::UserCancelled, "user stopped", Some(&correlation));
                    self.emitter().task_aborted("stopped by user");
                    return Approval::Terminated;
                }
                Some(other) => debug!(?other, "command ignored while awaiting approval"),
                None => {
                    self.abort_cancelled("handle dropped");
                    return Approval::Terminated;
                }
            }
        }
    }

    /// Run the scheduler, servicing injections while stages execute
    async fn execute(
        &mut self,
        plan: &OrchestrationPlan,
        rx: &mut mpsc::Receiver<TeamCommand>,
    ) -> Option<ExecutionSummary> {
        let emitter = self.emitter();
        let runner = StageRunner::new(self.settings.stage_runner_config(), emitter.clone());
        let workspace = Arc::new(WorkspaceManager::new(WorkspaceConfig {
            strategy: self.settings.workspace_strategy,
            root: self.settings.working_directory.clone(),
            ..Default::default()
        }));
        let chunk_worker = Arc::new(TeamChunkWorker {
            llm: self.ctx.llm.clone(),
            settings: self.settings.clone(),
            executor: self.ctx.tools.clone(),
            gate: self.ctx.gate.clone(),
            emitter,
            workspace,
            cost: self.cost.clone(),
        });

        let run_cancel = self.cancel.clone();
        let run = runner.run(plan, chunk_worker, &run_cancel);
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    match result {
                        Ok(summary) => return Some(summary),
                        Err(e) => {
                            self.fail(&format!("scheduler error: {}", e));
                            return None;
                        }
                    }
                }
                command = rx.recv() => match command {
                    Some(TeamCommand::Inject { instruction, correlation }) => {
                        self.ctx.bus.emitter_for(&self.session.id).injection_received(&instruction, Some(&correlation));
                        runner.inject(instruction);
                    }
                    Some(TeamCommand::Stop { .. }) => {
                        self.cancel.cancel();
                    }
                    Some(other) => debug!(?other, "command ignored while executing"),
                    None => self.cancel.cancel(),
                },
            }
        }
    }

    async fn synthesise(&mut self, summary: &ExecutionSummary) -> Result<ConsolidatedReport, LlmError> {
        let mut task = String::from("Worker results:\n");
        for result in &summary.results {
            task.push_str(&format!("\n## {} ({:?})\n{}\n", result.chunk_id, result.status, result.output));
        }

        let mut config = role_config(Role::Synthesis);
        if config.model_override.is_none() {
            config.model_override = self.settings.orchestrator_model.clone();
        }
        let model = config.model_override.clone().unwrap_or_else(|| "default".to_string());
        let system_prompt =
            render_prompt(&config.system_prompt, &PromptContext::for_task(&task)).unwrap_or_else(|_| task.clone());

        let mut agent = AgentHandle::new("synthesis", config, self.ctx.llm.clone(), self.emitter());
        self.session.register_agent(agent.instance().clone());
        let input = AgentInput::new(system_prompt, vec![Message::user("Produce the consolidated summary.")], 1);

        let output = tokio::time::timeout(self.settings.orchestrator_llm_timeout(), agent.process(input, &self.cancel))
            .await
            .map_err(|_| LlmError::Timeout(self.settings.orchestrator_llm_timeout()))??;
        agent.dispose();

        self.cost.record_turn(
            output.usage.input_tokens,
            output.usage.output_tokens,
            output.usage.cost_usd(&model),
        );
        self.session.cost = self.cost.snapshot();

        let (summary_text, next_steps) = extract_action_markers(&output.message);
        Ok(ConsolidatedReport {
            summary: summary_text,
            next_steps,
            succeeded_chunks: summary.succeeded(),
            failed_chunks: summary.failed(),
            cancelled_chunks: summary.cancelled(),
            worker_results: summary.results.clone(),
            cost: self.cost.snapshot(),
        })
    }

    /// Answer follow-up questions from the accumulated history
    async fn follow_up_loop(&mut self, history: &mut Vec<Message>, rx: &mut mpsc::Receiver<TeamCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                TeamCommand::UserMessage { text, .. } => {
                    self.append_message(AuthorRole::User, MessageType::UserMessage, &text);
                    history.push(Message::user(text));

                    let request = crate::llm::CompletionRequest::new(
                        "Answer the user's follow-up question using the conversation so far. \
                         Do not re-run any work.",
                        history.clone(),
                    )
                    .with_model(self.settings.orchestrator_model.clone());

                    match self.ctx.llm.complete(request).await {
                        Ok(response) => {
                            let answer = response.content.unwrap_or_default();
                            history.push(Message::assistant(answer.clone()));
                            self.append_message(AuthorRole::Head, MessageType::Commentary, &answer);
                            self.emitter().emit(crate::events::EventKind::OrchestratorCommentary {
                                text: answer,
                            });
                        }
                        Err(e) => warn!(error = %e, "follow-up answer failed"),
                    }
                }
                TeamCommand::Stop { .. } => break,
                TeamCommand::Reset { correlation } => {
                    self.fire(TeamTrigger::Reset, "reset to idle", Some(&correlation));
                    break;
                }
                TeamCommand::ApprovePlan { .. } => {
                    // Duplicate approval after completion has no effect
                    debug!("approve ignored after completion");
                }
                other => debug!(?other, "command ignored after completion"),
            }
        }
    }

    fn fail(&mut self, reason: &str) {
        warn!(session = %self.session.id, reason, "team session failed");
        self.fire(TeamTrigger::Error, reason, None);
        self.emitter().task_aborted(reason);
        self.session.complete();
    }

    fn abort_cancelled(&mut self, reason: &str) {
        self.fire(TeamTrigger::UserCancelled, reason, None);
        self.emitter().task_aborted(reason);
        self.session.complete();
    }

    async fn persist_session(&self) {
        if let Some(persistence) = &self.ctx.persistence {
            if let Err(e) = persistence.save_session(&self.session).await {
                warn!(error = %e, "session persistence failed");
            }
        }
    }
}

enum Approval {
    Approved,
    Rejected,
    Terminated,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::EventBus;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, StopReason, TokenUsage, ToolCall};

    fn plan_response(chunks: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "t1".into(),
                name: "submit_plan".into(),
                input: serde_json::json!({ "chunks": chunks }),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        }
    }

    fn single_chunk_plan() -> serde_json::Value {
        serde_json::json!([{
            "id": "c1",
            "sequenceIndex": 0,
            "title": "Analyse",
            "prompt": "Analyse module X",
            "dependsOn": [],
            "assignedRole": "CodeAnalysis"
        }])
    }

    async fn wait_for_event(
        rx: &mut tokio::sync::broadcast::Receiver<crate::events::Event>,
        name: &str,
    ) -> crate::events::Event {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
                .unwrap();
            if event.event_type() == name {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_single_chunk_pipeline_completes() {
        let llm = Arc::new(MockLlmClient::new(vec![
            plan_response(single_chunk_plan()),
            CompletionResponse::text("analysis complete").with_usage(50, 20),
            CompletionResponse::text("Everything worked. [ACTION: review the findings]").with_usage(30, 10),
        ]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let settings = TeamSettings {
            maintain_follow_up_context: false,
            retry_delay_secs: 0,
            ..Default::default()
        };
        let handle = TeamDriver::start("analyse module X", settings, ctx);
        assert!(handle.session_id().contains("session"));

        wait_for_event(&mut events, "PlanCreated").await;
        handle.approve_plan().await;

        let completed = wait_for_event(&mut events, "TaskCompleted").await;
        if let crate::events::EventKind::TaskCompleted { report } = completed.kind {
            assert_eq!(report["succeeded_chunks"], 1);
            assert_eq!(report["failed_chunks"], 0);
            assert_eq!(report["next_steps"][0], "review the findings");
            let summary = report["summary"].as_str().unwrap();
            assert!(!summary.contains("ACTION"));
        } else {
            panic!("expected TaskCompleted");
        }
    }

    #[tokio::test]
    async fn test_clarification_round_trip() {
        let llm = Arc::new(MockLlmClient::new(vec![
            // First call asks a question, second submits the plan
            CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "t1".into(),
                    name: "ask_clarifications".into(),
                    input: serde_json::json!({"questions": ["Which module?"]}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            },
            plan_response(single_chunk_plan()),
            CompletionResponse::text("done").with_usage(5, 5),
            CompletionResponse::text("Summary.").with_usage(5, 5),
        ]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let handle = TeamDriver::start(
            "analyse it",
            TeamSettings {
                maintain_follow_up_context: false,
                ..Default::default()
            },
            ctx,
        );

        let requested = wait_for_event(&mut events, "ClarificationRequested").await;
        if let crate::events::EventKind::ClarificationRequested { questions } = requested.kind {
            assert_eq!(questions, vec!["Which module?"]);
        }

        handle.send_user_message("module X").await;
        wait_for_event(&mut events, "ClarificationReceived").await;
        wait_for_event(&mut events, "PlanCreated").await;
        handle.approve_plan().await;
        wait_for_event(&mut events, "TaskCompleted").await;
    }

    #[tokio::test]
    async fn test_rejection_returns_to_clarifying() {
        let llm = Arc::new(MockLlmClient::new(vec![
            plan_response(single_chunk_plan()),
            plan_response(single_chunk_plan()),
            CompletionResponse::text("done").with_usage(5, 5),
            CompletionResponse::text("Summary.").with_usage(5, 5),
        ]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let handle = TeamDriver::start(
            "task",
            TeamSettings {
                maintain_follow_up_context: false,
                ..Default::default()
            },
            ctx,
        );

        wait_for_event(&mut events, "PlanCreated").await;
        handle.reject_plan("too coarse").await;
        // A second plan arrives after rejection
        wait_for_event(&mut events, "PlanCreated").await;
        handle.approve_plan().await;
        wait_for_event(&mut events, "TaskCompleted").await;
    }

    #[tokio::test]
    async fn test_stop_aborts_cleanly() {
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "t1".into(),
                    name: "ask_clarifications".into(),
                    input: serde_json::json!({"questions": ["?"]}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            },
        ]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let handle = TeamDriver::start("task", TeamSettings::default(), ctx);
        wait_for_event(&mut events, "ClarificationRequested").await;

        handle.stop().await;
        let aborted = wait_for_event(&mut events, "TaskAborted").await;
        assert!(matches!(aborted.kind, crate::events::EventKind::TaskAborted { .. }));

        // Second stop is a no-op against a finished session
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_empty_plan_completes_immediately() {
        let llm = Arc::new(MockLlmClient::new(vec![plan_response(serde_json::json!([]))]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let handle = TeamDriver::start(
            "nothing to do",
            TeamSettings {
                maintain_follow_up_context: false,
                ..Default::default()
            },
            ctx,
        );
        wait_for_event(&mut events, "PlanCreated").await;
        handle.approve_plan().await;

        // No synthesis call happens; the report is empty
        let completed = wait_for_event(&mut events, "TaskCompleted").await;
        if let crate::events::EventKind::TaskCompleted { report } = completed.kind {
            assert_eq!(report["succeeded_chunks"], 0);
            assert_eq!(report["worker_results"].as_array().unwrap().len(), 0);
            assert_eq!(report["summary"], "");
        }
    }

    #[tokio::test]
    async fn test_cyclic_plan_fails_session() {
        let cyclic = serde_json::json!([
            {"id": "c1", "sequenceIndex": 0, "title": "a", "prompt": "a", "dependsOn": ["c2"], "assignedRole": "Generic"},
            {"id": "c2", "sequenceIndex": 1, "title": "b", "prompt": "b", "dependsOn": ["c1"], "assignedRole": "Generic"}
        ]);
        let llm = Arc::new(MockLlmClient::new(vec![plan_response(cyclic)]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut events = bus.subscribe();
        let ctx = DriverContext::new(llm, bus.clone());

        let handle = TeamDriver::start("task", TeamSettings::default(), ctx);
        wait_for_event(&mut events, "PlanCreated").await;
        handle.approve_plan().await;

        let aborted = wait_for_event(&mut events, "TaskAborted").await;
        if let crate::events::EventKind::TaskAborted { reason } = aborted.kind {
            assert!(reason.contains("cyclic") || reason.contains("invalid plan"), "{}", reason);
        }
    }
}
