//! Panel discussion engine
//!
//! One Head clarifies and synthesises, one Moderator steers the debate
//! and watches for convergence, N persona panelists argue. Guard rails
//! bound turns, tokens, tool calls, and wall clock; any breach forces
//! the discussion into Converging.

mod moderator;
mod synthesis;

pub use moderator::ModeratorDecision;
pub use synthesis::{KnowledgeBrief, PanelSynthesis};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentHandle, AgentInput, PromptContext, render_prompt, role_config};
use crate::config::{PanelSettings, PanelistPreset};
use crate::context::DriverContext;
use crate::domain::{
    AuthorRole, ConvergenceResult, ConvergenceStatus, CostTracker, GuardRailBreach, MessageType, Role, Session,
    SessionMessage, generate_id,
};
use crate::events::{EventEmitter, EventKind};
use crate::llm::{CompletionRequest, LlmError, Message};
use crate::phase::{PanelPhase, PanelTrigger, PhaseMachine, panel_machine};

/// Commands the UI sends into a running Panel session
#[derive(Debug)]
pub enum PanelCommand {
    UserMessage { text: String, correlation: String },
    ApprovePlan { correlation: String },
    RejectPlan { reason: String, correlation: String },
    Inject { instruction: String, correlation: String },
    Pause { correlation: String },
    Resume { correlation: String },
    Stop { correlation: String },
    /// Return a finished session to Idle
    Reset { correlation: String },
}

/// Client handle for a running Panel session
#[derive(Clone)]
pub struct PanelHandle {
    tx: mpsc::Sender<PanelCommand>,
    session_id: String,
    cancel: CancellationToken,
}

impl PanelHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, command: PanelCommand) {
        let _ = self.tx.send(command).await;
    }

    pub async fn send_user_message(&self, text: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "message");
        self.send(PanelCommand::UserMessage {
            text: text.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn approve_plan(&self) -> String {
        let correlation = generate_id("cmd", "approve");
        self.send(PanelCommand::ApprovePlan {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn reject_plan(&self, reason: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "reject");
        self.send(PanelCommand::RejectPlan {
            reason: reason.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn inject_instruction(&self, instruction: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "inject");
        self.send(PanelCommand::Inject {
            instruction: instruction.into(),
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn pause(&self) -> String {
        let correlation = generate_id("cmd", "pause");
        self.send(PanelCommand::Pause {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn resume(&self) -> String {
        let correlation = generate_id("cmd", "resume");
        self.send(PanelCommand::Resume {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    pub async fn reset(&self) -> String {
        let correlation = generate_id("cmd", "reset");
        self.send(PanelCommand::Reset {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }

    /// Stop the session; idempotent
    pub async fn stop(&self) -> String {
        let correlation = generate_id("cmd", "stop");
        self.cancel.cancel();
        self.send(PanelCommand::Stop {
            correlation: correlation.clone(),
        })
        .await;
        correlation
    }
}

/// Personas seated for a preset
pub fn personas_for(preset: PanelistPreset, custom: &[String]) -> Vec<String> {
    const ALL: [&str; 8] = [
        "Security",
        "Performance",
        "Architect",
        "QA",
        "DevOps",
        "UX",
        "Domain",
        "Devil's Advocate",
    ];
    match preset {
        PanelistPreset::Quick => ALL[..3].iter().map(|s| s.to_string()).collect(),
        PanelistPreset::Balanced => ALL[..5].iter().map(|s| s.to_string()).collect(),
        PanelistPreset::All => ALL.iter().map(|s| s.to_string()).collect(),
        PanelistPreset::Custom => {
            if custom.is_empty() {
                ALL[..3].iter().map(|s| s.to_string()).collect()
            } else {
                custom.to_vec()
            }
        }
    }
}

/// The Panel driver; [`start`](PanelDriver::start) spawns the discussion
pub struct PanelDriver;

impl PanelDriver {
    pub fn start(prompt: impl Into<String>, settings: PanelSettings, ctx: DriverContext) -> PanelHandle {
        let prompt = prompt.into();
        let settings = settings.effective();
        let session = Session::new(&prompt, settings.guard_rails());
        let session_id = session.id.clone();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);

        let run = PanelRun {
            settings,
            ctx,
            session,
            machine: panel_machine(),
            cancel: cancel.clone(),
            cost: Arc::new(CostTracker::new()),
            transcript: Vec::new(),
            injections: Vec::new(),
            tokens_total: 0,
            tool_calls_total: 0,
        };
        tokio::spawn(run.run(prompt, rx));

        PanelHandle {
            tx,
            session_id,
            cancel,
        }
    }
}

enum Flow {
    Continue,
    Stopped,
}

enum ApprovalFlow {
    Approved,
    Rejected,
    Stopped,
}

/// One speaking turn's observed usage, checked against the per-turn rails
#[derive(Debug, Clone, Copy, Default)]
struct TurnUsage {
    tokens: u64,
    /// Tool calls the model requested, including any dropped past the cap
    tool_calls: u32,
    duration_secs: u64,
}

fn turn_usage(output: &crate::agent::AgentOutput, duration_secs: u64) -> TurnUsage {
    TurnUsage {
        tokens: output.usage.total(),
        tool_calls: output.tool_calls_requested.max(output.tool_calls.len() as u32),
        duration_secs,
    }
}

struct PanelRun {
    settings: PanelSettings,
    ctx: DriverContext,
    session: Session,
    machine: PhaseMachine<PanelPhase, PanelTrigger>,
    cancel: CancellationToken,
    cost: Arc<CostTracker>,
    /// (persona, contribution) in speaking order
    transcript: Vec<(String, String)>,
    injections: Vec<String>,
    tokens_total: u64,
    tool_calls_total: u32,
}

impl PanelRun {
    fn emitter(&self) -> EventEmitter {
        self.ctx.bus.emitter_for(&self.session.id)
    }

    fn fire(&mut self, trigger: PanelTrigger, reason: &str, correlation: Option<&str>) {
        if let Some(transition) = self.machine.fire(trigger) {
            self.session.set_phase(transition.to.to_string());
            self.emitter()
                .phase_changed(transition.from.to_string(), transition.to.to_string(), reason, correlation);
        }
    }

    async fn run(mut self, prompt: String, mut rx: mpsc::Receiver<PanelCommand>) {
        info!(session = %self.session.id, "panel session starting");
        self.session.append_message(SessionMessage::user(&self.session.id.clone(), &prompt));
        self.fire(PanelTrigger::UserSubmitted, "question submitted", None);

        // Clarify and frame, then await approval of the discussion brief
        let Some(brief) = self.clarify_and_frame(&prompt, &mut rx).await else {
            return;
        };

        // Preparing: seat the panel
        let personas = personas_for(self.settings.panelist_preset, &self.settings.custom_personas);
        let mut panelists: Vec<Option<AgentHandle>> = personas
            .iter()
            .map(|persona| Some(self.make_panelist(persona)))
            .collect();
        for agent in panelists.iter().flatten() {
            self.session.register_agent(agent.instance().clone());
        }
        self.fire(PanelTrigger::PanelistsReady, "panel seated", None);

        // Running: the moderated turn cycle
        let convergence = match self.debate(&brief, &personas, &mut panelists, &mut rx).await {
            Some(result) => result,
            None => {
                self.dispose_panel(&mut panelists);
                return;
            }
        };

        self.emitter().emit(EventKind::OrchestratorCommentary {
            text: format!(
                "Discussion closed (score {}): {}",
                convergence.score, convergence.explanation
            ),
        });
        self.fire(PanelTrigger::StartSynthesis, "beginning synthesis", None);

        // Synthesising
        let synthesis = match self.synthesise(&prompt).await {
            Ok(synthesis) => synthesis,
            Err(LlmError::Cancelled) => {
                self.abort("stopped during synthesis");
                self.dispose_panel(&mut panelists);
                return;
            }
            Err(e) => {
                self.fail(&format!("synthesis failed: {}", e));
                self.dispose_panel(&mut panelists);
                return;
            }
        };

        self.session.append_message(SessionMessage::new(
            &self.session.id,
            None,
            AuthorRole::Head,
            MessageType::Synthesis,
            &synthesis.consolidated_answer,
        ));
        match serde_json::to_value(&synthesis) {
            Ok(json) => self.emitter().task_completed(json),
            Err(e) => warn!(error = %e, "synthesis serialisation failed"),
        }
        self.fire(PanelTrigger::SynthesisComplete, "synthesis delivered", None);
        self.session.cost = self.cost.snapshot();
        self.session.complete();
        self.dispose_panel(&mut panelists);

        // Knowledge brief backs all follow-up questions
        let knowledge = self.generate_brief(&prompt).await;
        self.follow_up_loop(knowledge, &mut rx).await;
        info!(session = %self.session.id, "panel session finished");
    }

    fn make_panelist(&self, persona: &str) -> AgentHandle {
        let mut config = role_config(Role::Panelist);
        if config.model_override.is_none() {
            config.model_override = self.settings.panelist_model.clone();
        }
        let mut agent = AgentHandle::new(
            format!("panelist-{}", persona.to_lowercase().replace(' ', "-")),
            config,
            self.ctx.llm.clone(),
            self.emitter(),
        )
        .with_max_tool_calls_per_turn(self.settings.max_tool_calls_per_turn);
        if self.settings.allow_file_system_access {
            if let Some(tools) = &self.ctx.tools {
                agent = agent.with_tools(tools.clone(), self.ctx.gate.clone());
            }
        }
        agent
    }

    fn dispose_panel(&self, panelists: &mut [Option<AgentHandle>]) {
        for slot in panelists.iter_mut() {
            if let Some(agent) = slot.as_mut() {
                agent.dispose();
            }
        }
    }

    /// Head clarification loop; returns the approved discussion brief
    async fn clarify_and_frame(&mut self, prompt: &str, rx: &mut mpsc::Receiver<PanelCommand>) -> Option<String> {
        let mut history = vec![Message::user(prompt.to_string())];
        let head_config = role_config(Role::Head);
        let system_prompt = render_prompt(&head_config.system_prompt, &PromptContext::for_task(prompt))
            .unwrap_or_else(|_| head_config.system_prompt.clone());

        loop {
            let request = CompletionRequest::new(system_prompt.clone(), history.clone())
                .with_model(self.settings.head_model.clone().or(head_config.model_override.clone()));

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.abort("stopped while clarifying");
                    return None;
                }
                response = self.ctx.llm.complete(request) => response,
            };

            let brief = match response {
                Ok(response) => {
                    let model = self.settings.head_model.clone();
                    self.record_usage(&response.usage, model.as_deref());
                    response.content.unwrap_or_default()
                }
                Err(LlmError::Cancelled) => {
                    self.abort("stopped while clarifying");
                    return None;
                }
                Err(e) => {
                    self.fail(&format!("head clarification failed: {}", e));
                    return None;
                }
            };

            // A question mark at the end means the head is still clarifying
            let is_question = brief.trim_end().ends_with('?');
            if is_question {
                self.emitter().clarification_requested(vec![brief.clone()]);
                history.push(Message::assistant(brief));
                match self.wait_for_message(rx).await {
                    Some(answer) => {
                        history.push(Message::user(answer));
                        continue;
                    }
                    None => return None,
                }
            }

            self.session.append_message(SessionMessage::new(
                &self.session.id,
                None,
                AuthorRole::Head,
                MessageType::Plan,
                &brief,
            ));
            self.emitter().emit(EventKind::OrchestratorCommentary { text: brief.clone() });
            self.fire(PanelTrigger::ClarificationsComplete, "discussion framed", None);

            match self.await_approval(rx).await {
                ApprovalFlow::Approved => return Some(brief),
                ApprovalFlow::Rejected => {
                    history.push(Message::assistant(brief));
                    history.push(Message::user("The framing was rejected; revise it.".to_string()));
                    continue;
                }
                ApprovalFlow::Stopped => return None,
            }
        }
    }

    async fn wait_for_message(&mut self, rx: &mut mpsc::Receiver<PanelCommand>) -> Option<String> {
        loop {
            match rx.recv().await {
                Some(PanelCommand::UserMessage { text, correlation }) => {
                    self.emitter().clarification_received(&text, Some(&correlation));
                    return Some(text);
                }
                Some(PanelCommand::Stop { correlation }) => {
                    self.cancel.cancel();
                    self.fire(PanelTrigger::UserStopped, "user stopped", Some(&correlation));
                    self.emitter().task_aborted("stopped by user");
                    return None;
                }
                Some(PanelCommand::Inject { instruction, correlation }) => {
                    self.emitter().injection_received(&instruction, Some(&correlation));
                    self.injections.push(instruction);
                }
                Some(other) => debug!(?other, "command ignored while clarifying"),
                None => {
                    self.abort("handle dropped");
                    return None;
                }
            }
        }
    }

    async fn await_approval(&mut self, rx: &mut mpsc::Receiver<PanelCommand>) -> ApprovalFlow {
        loop {
            match rx.recv().await {
                Some(PanelCommand::ApprovePlan { correlation }) => {
                    self.fire(PanelTrigger::UserApproved, "brief approved", Some(&correlation));
                    return ApprovalFlow::Approved;
                }
                Some(PanelCommand::RejectPlan { reason, correlation }) => {
                    self.fire(PanelTrigger::UserRejected, "brief rejected", Some(&correlation));
                    self.injections.push(format!("The brief was rejected: {}", reason));
                    return ApprovalFlow::Rejected;
                }
                Some(PanelCommand::Stop { correlation }) => {
                    self.cancel.cancel();
                    self.fire(PanelTrigger::UserStopped, "user stopped", Some(&correlation));
                    self.emitter().task_aborted("stopped by user");
                    return ApprovalFlow::Stopped;
                }
                Some(PanelCommand::Inject { instruction, correlation }) => {
                    self.emitter().injection_received(&instruction, Some(&correlation));
                    self.injections.push(instruction);
                }
                Some(other) => debug!(?other, "command ignored while awaiting approval"),
                None => {
                    self.abort("handle dropped");
                    return ApprovalFlow::Stopped;
                }
            }
        }
    }

    /// The moderated turn cycle; returns the closing convergence result,
    /// or None when the session terminated
    async fn debate(
        &mut self,
        brief: &str,
        personas: &[String],
        panelists: &mut Vec<Option<AgentHandle>>,
        rx: &mut mpsc::Receiver<PanelCommand>,
    ) -> Option<ConvergenceResult> {
        let started = Instant::now();
        let turn_timeout = Duration::from_secs(self.session.guard_rails.max_single_turn_secs);
        let mut turns = 0u32;
        let mut redirect: Option<String> = None;

        loop {
            if let Flow::Stopped = self.service_commands(rx).await {
                return None;
            }

            // Guard rails force Converging on any breach
            if let Some(breach) = self.session.guard_rails.check(
                turns,
                self.tokens_total,
                self.tool_calls_total,
                started.elapsed().as_secs(),
            ) {
                return Some(self.rail_breach(breach));
            }

            // Moderator turn, bounded by the single-turn rail
            let decision = match tokio::time::timeout(turn_timeout, self.moderator_decision(brief, turns)).await {
                Ok(Some(decision)) => decision,
                Ok(None) => return None,
                Err(_) => return Some(self.rail_breach(GuardRailBreach::SingleTurnDuration)),
            };
            if let Some(message) = &decision.redirect_message {
                redirect = Some(message.clone());
            }

            if decision.stop_discussion {
                self.fire(PanelTrigger::ConvergenceDetected, "moderator stopped discussion", None);
                return Some(ConvergenceResult::completed(
                    decision.convergence_score,
                    self.settings.convergence_threshold,
                    "moderator stopped the discussion",
                ));
            }

            // Periodic convergence evaluation
            if self.settings.convergence_check_interval > 0
                && turns >= 2
                && turns % self.settings.convergence_check_interval == 0
            {
                let result = match tokio::time::timeout(turn_timeout, self.evaluate_convergence(brief)).await {
                    Ok(Some(result)) => result,
                    Ok(None) => return None,
                    Err(_) => return Some(self.rail_breach(GuardRailBreach::SingleTurnDuration)),
                };
                if !result.continues_discussion() {
                    self.fire(PanelTrigger::ConvergenceDetected, "convergence detected", None);
                    return Some(result);
                }
            }

            // Speaker turn(s); a turn past its caps ends the discussion
            let turn_usages = if decision.parallel_group_valid() {
                match tokio::time::timeout(
                    turn_timeout,
                    self.parallel_turns(brief, personas, panelists, &decision.parallel_group, redirect.take()),
                )
                .await
                {
                    Ok(Some((spoken, usages))) => {
                        turns += spoken;
                        usages
                    }
                    Ok(None) => return None,
                    Err(_) => return Some(self.rail_breach(GuardRailBreach::SingleTurnDuration)),
                }
            } else {
                let index = match &decision.next_speaker {
                    Some(name) => personas.iter().position(|p| p.eq_ignore_ascii_case(name)),
                    None => None,
                }
                .unwrap_or((turns as usize) % personas.len());

                match tokio::time::timeout(
                    turn_timeout,
                    self.single_turn(brief, personas, panelists, index, redirect.take()),
                )
                .await
                {
                    Ok(Some(usage)) => {
                        turns += 1;
                        vec![usage]
                    }
                    Ok(None) => return None,
                    Err(_) => return Some(self.rail_breach(GuardRailBreach::SingleTurnDuration)),
                }
            };

            for usage in turn_usages {
                if let Some(breach) =
                    self.session
                        .guard_rails
                        .check_turn(usage.tokens, usage.tool_calls, usage.duration_secs)
                {
                    return Some(self.rail_breach(breach));
                }
            }
        }
    }

    /// Force Converging after a guard-rail breach
    fn rail_breach(&mut self, breach: GuardRailBreach) -> ConvergenceResult {
        warn!(?breach, "guard rail breached, forcing convergence");
        self.fire(PanelTrigger::Timeout, "guard rail breached", None);
        ConvergenceResult::completed(
            0,
            self.settings.convergence_threshold,
            format!("guard rail breached: {:?}", breach),
        )
    }

    /// Drain pending commands; handles pause, stop, injection
    async fn service_commands(&mut self, rx: &mut mpsc::Receiver<PanelCommand>) -> Flow {
        loop {
            let command = match rx.try_recv() {
                Ok(command) => command,
                Err(_) => return Flow::Continue,
            };
            match command {
                PanelCommand::Pause { correlation } => {
                    self.fire(PanelTrigger::UserPaused, "paused by user", Some(&correlation));
                    // Frozen until resume or stop
                    loop {
                        match rx.recv().await {
                            Some(PanelCommand::Resume { correlation }) => {
                                self.fire(PanelTrigger::UserResumed, "resumed by user", Some(&correlation));
                                break;
                            }
                            Some(PanelCommand::Stop { correlation }) => {
                                self.cancel.cancel();
                                self.fire(PanelTrigger::UserStopped, "user stopped", Some(&correlation));
                                self.emitter().task_aborted("stopped by user");
                                return Flow::Stopped;
                            }
                            Some(PanelCommand::Inject { instruction, correlation }) => {
                                self.emitter().injection_received(&instruction, Some(&correlation));
                                self.injections.push(instruction);
                            }
                            Some(other) => debug!(?other, "command ignored while paused"),
                            None => return Flow::Stopped,
                        }
                    }
                }
                PanelCommand::Stop { correlation } => {
                    self.cancel.cancel();
                    self.fire(PanelTrigger::UserStopped, "user stopped", Some(&correlation));
                    self.emitter().task_aborted("stopped by user");
                    return Flow::Stopped;
                }
                PanelCommand::Inject { instruction, correlation } => {
                    self.emitter().injection_received(&instruction, Some(&correlation));
                    self.injections.push(instruction);
                }
                PanelCommand::UserMessage { text, correlation } => {
                    self.emitter().clarification_received(&text, Some(&correlation));
                    self.injections.push(text);
                }
                other => debug!(?other, "command ignored while running"),
            }
        }
    }

    async fn moderator_decision(&mut self, brief: &str, turns: u32) -> Option<ModeratorDecision> {
        let config = role_config(Role::Moderator);
        let system_prompt = render_prompt(&config.system_prompt, &PromptContext::for_task(brief))
            .unwrap_or_else(|_| config.system_prompt.clone());

        let prompt = format!(
            "Turn {}. Recent transcript:\n{}\n\nAnswer with your moderation decision as JSON.",
            turns,
            self.transcript_tail(12)
        );
        let request = CompletionRequest::new(system_prompt, vec![Message::user(prompt)])
            .with_model(self.settings.moderator_model.clone())
            .with_temperature(config.temperature);

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.abort("stopped during moderation");
                return None;
            }
            response = self.ctx.llm.complete(request) => response,
        };

        match response {
            Ok(response) => {
                let model = self.settings.moderator_model.clone();
                self.record_usage(&response.usage, model.as_deref());
                let text = response.content.unwrap_or_default();
                match moderator::parse_decision(&text) {
                    Some(decision) => {
                        self.emitter().emit(EventKind::Reasoning {
                            agent_id: "moderator".into(),
                            text: format!(
                                "next={:?} score={} stop={}",
                                decision.next_speaker, decision.convergence_score, decision.stop_discussion
                            ),
                        });
                        Some(decision)
                    }
                    // Fail-open: never let a bad moderator reply end the debate
                    None => {
                        warn!("moderator reply unparseable, using fallback decision");
                        Some(ModeratorDecision::fallback())
                    }
                }
            }
            Err(LlmError::Cancelled) => {
                self.abort("stopped during moderation");
                None
            }
            Err(e) => {
                warn!(error = %e, "moderator call failed, using fallback decision");
                Some(ModeratorDecision::fallback())
            }
        }
    }

    async fn evaluate_convergence(&mut self, brief: &str) -> Option<ConvergenceResult> {
        let prompt = format!(
            "Evaluate how converged this discussion is.\n\nTopic:\n{}\n\nTranscript:\n{}\n\n\
             Answer as JSON: {{\"score\": 0-100, \"explanation\": \"...\"}}",
            brief,
            self.transcript_tail(20)
        );
        let request = CompletionRequest::new(
            "You evaluate whether a panel discussion has reached stable agreement.",
            vec![Message::user(prompt)],
        )
        .with_model(self.settings.moderator_model.clone());

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.abort("stopped during convergence check");
                return None;
            }
            response = self.ctx.llm.complete(request) => response,
        };

        Some(match response {
            Ok(response) => {
                let model = self.settings.moderator_model.clone();
                self.record_usage(&response.usage, model.as_deref());
                let text = response.content.unwrap_or_default();
                moderator::parse_convergence(&text, self.settings.convergence_threshold)
            }
            Err(LlmError::Cancelled) => {
                self.abort("stopped during convergence check");
                return None;
            }
            Err(e) => ConvergenceResult::inconclusive(ConvergenceStatus::Error, e.to_string()),
        })
    }

    /// Run 2-3 panelists concurrently; append responses in list order
    async fn parallel_turns(
        &mut self,
        brief: &str,
        personas: &[String],
        panelists: &mut Vec<Option<AgentHandle>>,
        group: &[String],
        redirect: Option<String>,
    ) -> Option<(u32, Vec<TurnUsage>)> {
        let mut selected: Vec<(usize, AgentHandle)> = Vec::new();
        for name in group {
            if let Some(index) = personas.iter().position(|p| p.eq_ignore_ascii_case(name)) {
                if let Some(agent) = panelists[index].take() {
                    selected.push((index, agent));
                }
            }
        }
        if selected.is_empty() {
            return Some((0, Vec::new()));
        }

        let started = Instant::now();
        let mut futures = Vec::new();
        for (index, mut agent) in selected {
            let persona = personas[index].clone();
            let input = self.panelist_input(brief, &persona, redirect.as_deref());
            let cancel = self.cancel.clone();
            futures.push(async move {
                let result = agent.process(input, &cancel).await;
                (index, persona, agent, result)
            });
        }

        let mut outputs = join_all(futures).await;
        // Responses append in group list order regardless of completion order
        outputs.sort_by_key(|(index, _, _, _)| *index);

        let duration_secs = started.elapsed().as_secs();
        let mut spoken = 0;
        let mut usages = Vec::new();
        for (index, persona, agent, result) in outputs {
            panelists[index] = Some(agent);
            match result {
                Ok(output) => {
                    usages.push(turn_usage(&output, duration_secs));
                    self.record_output(&persona, &output);
                    spoken += 1;
                }
                Err(LlmError::Cancelled) => {
                    self.abort("stopped mid-turn");
                    return None;
                }
                Err(e) => warn!(persona = %persona, error = %e, "panelist turn failed"),
            }
        }
        Some((spoken, usages))
    }

    async fn single_turn(
        &mut self,
        brief: &str,
        personas: &[String],
        panelists: &mut [Option<AgentHandle>],
        index: usize,
        redirect: Option<String>,
    ) -> Option<TurnUsage> {
        let persona = personas[index].clone();
        let input = self.panelist_input(brief, &persona, redirect.as_deref());

        let started = Instant::now();
        let mut agent = panelists[index].take()?;
        let result = agent.process(input, &self.cancel).await;
        panelists[index] = Some(agent);

        match result {
            Ok(output) => {
                let usage = turn_usage(&output, started.elapsed().as_secs());
                self.record_output(&persona, &output);
                Some(usage)
            }
            Err(LlmError::Cancelled) => {
                self.abort("stopped mid-turn");
                None
            }
            Err(e) => {
                warn!(persona = %persona, error = %e, "panelist turn failed");
                Some(TurnUsage::default())
            }
        }
    }

    fn panelist_input(&mut self, brief: &str, persona: &str, redirect: Option<&str>) -> AgentInput {
        let config = role_config(Role::Panelist);
        let ctx = PromptContext::for_task(brief)
            .with_persona(persona)
            .with_injected(std::mem::take(&mut self.injections));
        let system_prompt = render_prompt(&config.system_prompt, &ctx).unwrap_or_else(|_| config.system_prompt.clone());

        let mut prompt = format!("Discussion so far:\n{}\n", self.transcript_tail(16));
        if let Some(message) = redirect {
            prompt.push_str(&format!("\nModerator steer: {}\n", message));
        }
        prompt.push_str("\nMake your next contribution.");

        AgentInput::new(system_prompt, vec![Message::user(prompt)], 1)
            .with_max_tokens(self.settings.max_tokens_per_turn.min(u32::MAX as u64) as u32)
    }

    fn record_output(&mut self, persona: &str, output: &crate::agent::AgentOutput) {
        self.tokens_total += output.usage.total();
        self.tool_calls_total += output.tool_calls_requested.max(output.tool_calls.len() as u32);
        self.cost
            .record_turn(output.usage.input_tokens, output.usage.output_tokens, 0.0);

        self.transcript.push((persona.to_string(), output.message.clone()));
        self.session.append_message(SessionMessage::new(
            &self.session.id,
            None,
            AuthorRole::Worker,
            MessageType::Argument,
            &output.message,
        ));
    }

    fn transcript_tail(&self, entries: usize) -> String {
        let start = self.transcript.len().saturating_sub(entries);
        self.transcript[start..]
            .iter()
            .map(|(speaker, text)| format!("{}: {}", speaker, text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn synthesise(&mut self, prompt: &str) -> Result<PanelSynthesis, LlmError> {
        let transcript = self
            .transcript
            .iter()
            .map(|(speaker, text)| format!("{}: {}", speaker, text))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(
            "You are the head of a panel. Produce the consolidated synthesis as JSON with fields: \
             consolidatedAnswer, argumentsByPerspective, consensusPoints, dissentingPoints, \
             recommendations, confidence (0-100), followUpAreas.",
            vec![Message::user(format!(
                "Question:\n{}\n\nFull transcript:\n{}",
                prompt, transcript
            ))],
        )
        .with_model(self.settings.head_model.clone());

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
            response = self.ctx.llm.complete(request) => response?,
        };

        let model = self.settings.head_model.clone();
        self.record_usage(&response.usage, model.as_deref());
        let text = response.content.unwrap_or_default();
        Ok(synthesis::parse_synthesis(&text, &self.transcript))
    }

    /// Compress the discussion into the follow-up brief
    async fn generate_brief(&mut self, prompt: &str) -> KnowledgeBrief {
        let transcript = self.transcript_tail(usize::MAX.min(self.transcript.len()));
        let request = CompletionRequest::new(
            "Compress this discussion into a brief another agent can answer follow-up \
             questions from. Aim for about two thousand tokens.",
            vec![Message::user(format!(
                "Question:\n{}\n\nTranscript:\n{}",
                prompt, transcript
            ))],
        )
        .with_model(self.settings.head_model.clone())
        .with_max_tokens(2_048);

        match self.ctx.llm.complete(request).await {
            Ok(response) => {
                let model = self.settings.head_model.clone();
                self.record_usage(&response.usage, model.as_deref());
                KnowledgeBrief::new(response.content.unwrap_or_default())
            }
            Err(e) => {
                warn!(error = %e, "knowledge brief generation failed, using transcript tail");
                KnowledgeBrief::new(self.transcript_tail(8))
            }
        }
    }

    /// Follow-ups are answered from the brief only, never the transcript
    async fn follow_up_loop(&mut self, brief: KnowledgeBrief, rx: &mut mpsc::Receiver<PanelCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                PanelCommand::UserMessage { text, .. } => {
                    let request = CompletionRequest::new(
                        format!(
                            "Answer follow-up questions about a finished panel discussion. \
                             Your only context is this brief:\n\n{}",
                            brief.text
                        ),
                        vec![Message::user(text)],
                    )
                    .with_model(self.settings.head_model.clone());

                    match self.ctx.llm.complete(request).await {
                        Ok(response) => {
                            let answer = response.content.unwrap_or_default();
                            self.emitter().emit(EventKind::OrchestratorCommentary { text: answer });
                        }
                        Err(e) => warn!(error = %e, "follow-up answer failed"),
                    }
                }
                PanelCommand::Stop { .. } => break,
                PanelCommand::Reset { correlation } => {
                    self.fire(PanelTrigger::Reset, "reset to idle", Some(&correlation));
                    break;
                }
                other => debug!(?other, "command ignored after completion"),
            }
        }
    }

    fn record_usage(&mut self, usage: &crate::llm::TokenUsage, model: Option<&str>) {
        self.tokens_total += usage.total();
        self.cost.record_turn(
            usage.input_tokens,
            usage.output_tokens,
            usage.cost_usd(model.unwrap_or("default")),
        );
    }

    fn fail(&mut self, reason: &str) {
        warn!(session = %self.session.id, reason, "panel session failed");
        self.fire(PanelTrigger::Error, reason, None);
        self.emitter().task_aborted(reason);
        self.session.complete();
    }

    fn abort(&mut self, reason: &str) {
        self.fire(PanelTrigger::UserStopped, reason, None);
        self.emitter().task_aborted(reason);
        self.session.complete();
    }
}
