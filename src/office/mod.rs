//! Office manager loop driver
//!
//! A long-running supervisor: the manager agent discovers tasks, the
//! scheduler dispatches them onto a bounded pool of ephemeral assistants,
//! results are aggregated into an iteration report, then the loop rests
//! on a cancellable, overridable countdown before repeating.

mod manager;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentHandle, AgentInput, PromptContext, render_prompt, role_config};
use crate::config::{CommentaryMode, OfficeSettings};
use crate::context::DriverContext;
use crate::domain::{
    AssistantTask, AuthorRole, CostEstimate, CostTracker, GuardRails, IterationReport, MessageType, Role,
    SchedulingDecision, Session, SessionMessage, TaskStatus, generate_id,
};
use crate::events::{EventEmitter, EventKind};
use crate::llm::{LlmError, Message};
use crate::phase::{OfficePhase, OfficeTrigger, PhaseMachine, office_machine};

use manager::{FetchOutcome, TaskSpec};

/// Commands the UI sends into a running Office session
#[derive(Debug)]
pub enum OfficeCommand {
    UserMessage { text: String, correlation: String },
    ApprovePlan { correlation: String },
    RejectPlan { reason: String, correlation: String },
    Inject { instruction: String, correlation: String },
    Pause { correlation: String },
    Resume { correlation: String },
    Stop { correlation: String },
    Reset { correlation: String },
    CancelRest { correlation: String },
    OverrideRest { minutes: u64, correlation: String },
    UpdateSettings(Box<OfficeSettings>),
}

/// Client handle for a running Office session
#[derive(Clone)]
pub struct OfficeHandle {
    tx: mpsc::Sender<OfficeCommand>,
    session_id: String,
    cancel: CancellationToken,
}

macro_rules! handle_command {
    ($name:ident, $variant:ident, $tag:literal) => {
        pub async fn $name(&self) -> String {
            let correlation = generate_id("cmd", $tag);
            let _ = self
                .tx
                .send(OfficeCommand::$variant {
                    correlation: correlation.clone(),
                })
                .await;
            correlation
        }
    };
}

impl OfficeHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    handle_command!(approve_plan, ApprovePlan, "approve");
    handle_command!(pause, Pause, "pause");
    handle_command!(resume, Resume, "resume");
    handle_command!(reset, Reset, "reset");
    handle_command!(cancel_rest, CancelRest, "cancel-rest");

    pub async fn send_user_message(&self, text: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "message");
        let _ = self
            .tx
            .send(OfficeCommand::UserMessage {
                text: text.into(),
                correlation: correlation.clone(),
            })
            .await;
        correlation
    }

    pub async fn reject_plan(&self, reason: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "reject");
        let _ = self
            .tx
            .send(OfficeCommand::RejectPlan {
                reason: reason.into(),
                correlation: correlation.clone(),
            })
            .await;
        correlation
    }

    pub async fn inject_instruction(&self, instruction: impl Into<String>) -> String {
        let correlation = generate_id("cmd", "inject");
        let _ = self
            .tx
            .send(OfficeCommand::Inject {
                instruction: instruction.into(),
                correlation: correlation.clone(),
            })
            .await;
        correlation
    }

    /// Replace the remaining rest duration without restarting the loop
    pub async fn override_rest_duration(&self, minutes: u64) -> String {
        let correlation = generate_id("cmd", "override-rest");
        let _ = self
            .tx
            .send(OfficeCommand::OverrideRest {
                minutes,
                correlation: correlation.clone(),
            })
            .await;
        correlation
    }

    pub async fn update_settings(&self, settings: OfficeSettings) {
        let _ = self.tx.send(OfficeCommand::UpdateSettings(Box::new(settings))).await;
    }

    /// Stop the session; idempotent
    pub async fn stop(&self) -> String {
        let correlation = generate_id("cmd", "stop");
        self.cancel.cancel();
        let _ = self
            .tx
            .send(OfficeCommand::Stop {
                correlation: correlation.clone(),
            })
            .await;
        correlation
    }
}

/// Everything the manager accumulates over a run
#[derive(Debug, Default)]
pub struct ManagerContext {
    pub iteration: u64,
    pub approved_plan: Option<String>,
    /// Resolved clarification answers, delivered at the next manager call
    pub clarifications: Vec<String>,
    /// Injected instructions queued for the next manager call
    pub pending_injections: Vec<String>,
    pub reports: Vec<IterationReport>,
    pub totals: CostEstimate,
}

/// The Office driver; [`start`](OfficeDriver::start) spawns the loop
pub struct OfficeDriver;

impl OfficeDriver {
    pub fn start(objective: impl Into<String>, settings: OfficeSettings, ctx: DriverContext) -> OfficeHandle {
        let objective = objective.into();
        let mut settings = settings;
        if settings.objective.is_empty() {
            settings.objective = objective.clone();
        }
        let session = Session::new(&objective, GuardRails::default());
        let session_id = session.id.clone();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let (pause_tx, _) = watch::channel(false);

        let run = OfficeRun {
            settings,
            ctx,
            session,
            machine: office_machine(),
            cancel: cancel.clone(),
            cost: Arc::new(CostTracker::new()),
            manager: ManagerContext::default(),
            pause_tx,
            resume_phase: OfficePhase::FetchingEvents,
            deferred: Vec::new(),
        };
        tokio::spawn(run.run(rx));

        OfficeHandle {
            tx,
            session_id,
            cancel,
        }
    }
}

/// Side effects a handled command asks the current phase to apply
#[derive(Debug, PartialEq)]
enum Effect {
    None,
    RestCancelled,
    RestOverridden(u64),
    Stopped,
}

struct OfficeRun {
    settings: OfficeSettings,
    ctx: DriverContext,
    session: Session,
    machine: PhaseMachine<OfficePhase, OfficeTrigger>,
    cancel: CancellationToken,
    cost: Arc<CostTracker>,
    manager: ManagerContext,
    pause_tx: watch::Sender<bool>,
    /// Phase to restore when a pause lifts
    resume_phase: OfficePhase,
    /// Deferred task specs: (eligible_iteration, spec)
    deferred: Vec<(u64, TaskSpec)>,
}

impl OfficeRun {
    fn emitter(&self) -> EventEmitter {
        self.ctx.bus.emitter_for(&self.session.id)
    }

    fn paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    fn fire(&mut self, trigger: OfficeTrigger, reason: &str, correlation: Option<&str>) {
        if let Some(transition) = self.machine.fire(trigger) {
            self.session.set_phase(transition.to.to_string());
            self.emitter()
                .phase_changed(transition.from.to_string(), transition.to.to_string(), reason, correlation);
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<OfficeCommand>) {
        info!(session = %self.session.id, "office session starting");
        let objective = self.settings.objective.clone();
        self.session
            .append_message(SessionMessage::new(
                &self.session.id,
                None,
                AuthorRole::User,
                MessageType::UserMessage,
                &objective,
            ));
        self.fire(OfficeTrigger::UserSubmitted, "objective submitted", None);

        if !self.approve_standing_plan(&mut rx).await {
            self.post_stop(&mut rx).await;
            return;
        }

        // Iteration cycle
        loop {
            if !self.boundary(&mut rx).await {
                break;
            }
            self.manager.iteration += 1;
            let iteration_started = std::time::Instant::now();

            let tasks = match self.fetch(&mut rx).await {
                Fetched::Tasks(tasks) => tasks,
                Fetched::Stopped => break,
            };

            let mut tasks = if tasks.is_empty() {
                self.fire(OfficeTrigger::NoTasks, "no work this iteration", None);
                Vec::new()
            } else {
                self.fire(OfficeTrigger::TasksFetched, "task list ready", None);
                let scheduled = self.schedule(tasks);
                self.fire(OfficeTrigger::TasksScheduled, "scheduling decided", None);

                let mut scheduled = scheduled;
                if !self.execute(&mut scheduled, &mut rx).await {
                    break;
                }
                self.fire(OfficeTrigger::ExecutionFinished, "assistants done", None);
                scheduled
            };

            self.aggregate(&mut tasks, iteration_started.elapsed()).await;
            self.fire(OfficeTrigger::ReportReady, "iteration report ready", None);

            if !self.rest(&mut rx).await {
                break;
            }
            self.fire(OfficeTrigger::RestElapsed, "rest finished", None);
        }

        if self.machine.state() != OfficePhase::Stopped {
            self.fire(OfficeTrigger::UserStopped, "stopped", None);
            self.emitter().task_aborted("stopped by user");
        }
        self.post_stop(&mut rx).await;
        info!(session = %self.session.id, "office session finished");
    }

    /// Propose the standing plan and await approval when required
    async fn approve_standing_plan(&mut self, rx: &mut mpsc::Receiver<OfficeCommand>) -> bool {
        if !self.settings.require_plan_approval {
            self.fire(OfficeTrigger::ClarificationsComplete, "approval not required", None);
            self.fire(OfficeTrigger::UserApproved, "approval not required", None);
            return true;
        }

        let mut feedback: Vec<String> = Vec::new();
        loop {
            let plan = match manager::propose_plan(
                &self.ctx.llm,
                &self.settings.objective,
                &feedback,
                self.settings.manager_model.clone(),
                self.settings.manager_llm_timeout(),
                &self.cancel,
            )
            .await
            {
                Ok(plan) => plan,
                Err(LlmError::Cancelled) => return false,
                Err(e) => {
                    self.enter_error(&format!("plan proposal failed: {}", e));
                    return false;
                }
            };

            self.session.append_message(SessionMessage::new(
                &self.session.id,
                None,
                AuthorRole::Head,
                MessageType::Plan,
                &plan,
            ));
            self.emitter().emit(EventKind::OrchestratorCommentary { text: plan.clone() });
            self.fire(OfficeTrigger::ClarificationsComplete, "plan proposed", None);

            loop {
                match rx.recv().await {
                    Some(OfficeCommand::ApprovePlan { correlation }) => {
                        self.fire(OfficeTrigger::UserApproved, "plan approved", Some(&correlation));
                        self.manager.approved_plan = Some(plan);
                        return true;
                    }
                    Some(OfficeCommand::RejectPlan { reason, correlation }) => {
                        self.fire(OfficeTrigger::UserRejected, "plan rejected", Some(&correlation));
                        feedback.push(reason);
                        break;
                    }
                    Some(command) => {
                        if self.handle_command(command) == Effect::Stopped {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
    }

    /// Process one command outside its dedicated wait point
    fn handle_command(&mut self, command: OfficeCommand) -> Effect {
        match command {
            OfficeCommand::UserMessage { text, correlation } => {
                self.emitter().clarification_received(&text, Some(&correlation));
                self.manager.clarifications.push(text);
                Effect::None
            }
            OfficeCommand::Inject { instruction, correlation } => {
                self.emitter().injection_received(&instruction, Some(&correlation));
                self.manager.pending_injections.push(instruction);
                Effect::None
            }
            OfficeCommand::Pause { correlation } => {
                if !self.paused() && self.machine.state().is_active() {
                    self.resume_phase = self.machine.state();
                    let _ = self.pause_tx.send(true);
                    self.fire(OfficeTrigger::UserPaused, "paused by user", Some(&correlation));
                }
                Effect::None
            }
            OfficeCommand::Resume { correlation } => {
                if self.paused() {
                    let _ = self.pause_tx.send(false);
                    let transition = self.machine.restore(self.resume_phase);
                    self.session.set_phase(transition.to.to_string());
                    self.emitter().phase_changed(
                        transition.from.to_string(),
                        transition.to.to_string(),
                        "resumed by user",
                        Some(&correlation),
                    );
                }
                Effect::None
            }
            OfficeCommand::Stop { correlation } => {
                self.cancel.cancel();
                let _ = self.pause_tx.send(false);
                self.fire(OfficeTrigger::UserStopped, "stopped by user", Some(&correlation));
                self.emitter().task_aborted("stopped by user");
                Effect::Stopped
            }
            OfficeCommand::CancelRest { correlation } => {
                debug!(%correlation, "rest cancelled");
                Effect::RestCancelled
            }
            OfficeCommand::OverrideRest { minutes, correlation } => {
                debug!(minutes, %correlation, "rest overridden");
                Effect::RestOverridden(minutes)
            }
            OfficeCommand::UpdateSettings(settings) => {
                info!("office settings updated");
                self.settings = *settings;
                Effect::None
            }
            OfficeCommand::ApprovePlan { .. } | OfficeCommand::RejectPlan { .. } => {
                // Approval is only meaningful in AwaitingApproval
                debug!("approval command ignored outside approval phase");
                Effect::None
            }
            OfficeCommand::Reset { .. } => {
                debug!("reset ignored while running");
                Effect::None
            }
        }
    }

    /// Phase boundary: drain commands, honour pause, detect stop
    async fn boundary(&mut self, rx: &mut mpsc::Receiver<OfficeCommand>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(command) => {
                    if self.handle_command(command) == Effect::Stopped {
                        return false;
                    }
                }
                Err(_) => break,
            }
        }

        while self.paused() {
            match rx.recv().await {
                Some(command) => {
                    if self.handle_command(command) == Effect::Stopped {
                        return false;
                    }
                }
                None => return false,
            }
        }

        !self.cancel.is_cancelled()
    }

    /// FetchingEvents: ask the manager for this iteration's work
    async fn fetch(&mut self, _rx: &mut mpsc::Receiver<OfficeCommand>) -> Fetched {
        let config = role_config(Role::Manager);
        let system_prompt = render_prompt(
            &config.system_prompt,
            &PromptContext::for_task(&self.settings.objective),
        )
        .unwrap_or_else(|_| config.system_prompt.clone());

        let mut user_prompt = format!("Iteration {}.", self.manager.iteration);
        if let Some(plan) = &self.manager.approved_plan {
            user_prompt.push_str(&format!("\n\nStanding plan:\n{}", plan));
        }
        for answer in self.manager.clarifications.drain(..) {
            user_prompt.push_str(&format!("\n\nUser answer: {}", answer));
        }
        for injection in self.manager.pending_injections.drain(..) {
            user_prompt.push_str(&format!("\n\nInjected instruction: {}", injection));
        }
        if let Some(last) = self.manager.reports.last() {
            for hint in &last.next_iteration_hints {
                user_prompt.push_str(&format!("\n\nCarried hint: {}", hint));
            }
        }
        user_prompt.push_str("\n\nList the tasks for this iteration.");

        let outcome = manager::fetch_tasks(
            &self.ctx.llm,
            &system_prompt,
            &user_prompt,
            self.settings.manager_model.clone(),
            self.settings.manager_llm_timeout(),
            &self.cancel,
        )
        .await;

        let mut specs = match outcome {
            Ok(FetchOutcome::Tasks(specs)) => specs,
            Ok(FetchOutcome::Questions(questions)) => {
                self.emitter().clarification_requested(questions);
                Vec::new()
            }
            Err(LlmError::Cancelled) => return Fetched::Stopped,
            Err(e) => {
                warn!(error = %e, "manager fetch failed, treating as no work");
                Vec::new()
            }
        };

        // Deferred tasks that became eligible rejoin the pool
        let iteration = self.manager.iteration;
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(eligible, _)| *eligible <= iteration);
        self.deferred = later;
        specs.extend(due.into_iter().map(|(_, spec)| spec));

        Fetched::Tasks(specs)
    }

    /// Scheduling: decide dispatch/queue/skip/defer/merge per task
    fn schedule(&mut self, specs: Vec<TaskSpec>) -> Vec<AssistantTask> {
        let emitter = self.emitter();
        let mut tasks: Vec<AssistantTask> = Vec::new();
        let mut seen: Vec<(String, String)> = Vec::new(); // normalised instruction -> task id
        let mut dispatched = 0usize;
        let mut queued = 0usize;

        let mut specs = specs;
        specs.sort_by(|a, b| b.priority.cmp(&a.priority));

        for spec in specs {
            let mut task = AssistantTask::new(self.manager.iteration, &spec.instruction, spec.priority);

            let decision = if spec.defer_iterations > 0 {
                let until = self.manager.iteration + spec.defer_iterations;
                self.deferred.push((until, TaskSpec {
                    defer_iterations: 0,
                    ..spec.clone()
                }));
                SchedulingDecision::Deferred { until_iteration: until }
            } else if let Some((_, original)) = seen
                .iter()
                .find(|(normalised, _)| *normalised == normalise(&spec.instruction))
            {
                SchedulingDecision::Merged {
                    into_task: original.clone(),
                }
            } else if dispatched < self.settings.max_assistants {
                let decision = SchedulingDecision::Dispatched {
                    assistant_index: dispatched,
                };
                dispatched += 1;
                seen.push((normalise(&spec.instruction), task.id.clone()));
                decision
            } else if queued < self.settings.max_queue_depth {
                queued += 1;
                seen.push((normalise(&spec.instruction), task.id.clone()));
                SchedulingDecision::Queued { position: queued }
            } else {
                SchedulingDecision::Skipped {
                    reason: "queue full".to_string(),
                }
            };

            emitter.emit(EventKind::SchedulingDecision {
                task_id: task.id.clone(),
                decision: decision.clone(),
            });
            task.decision = Some(decision);
            tasks.push(task);
        }
        tasks
    }

    /// Executing: drain dispatched and queued tasks through the pool
    async fn execute(&mut self, tasks: &mut Vec<AssistantTask>, rx: &mut mpsc::Receiver<OfficeCommand>) -> bool {
        if self.settings.max_assistants == 0 {
            debug!("no assistant slots, everything stays queued");
            return true;
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_assistants));
        let mut join_set: JoinSet<AssistantTask> = JoinSet::new();

        for task in tasks.iter() {
            let eligible = matches!(
                task.decision,
                Some(SchedulingDecision::Dispatched { .. }) | Some(SchedulingDecision::Queued { .. })
            );
            if !eligible {
                continue;
            }

            let mut task = task.clone();
            let semaphore = semaphore.clone();
            let llm = self.ctx.llm.clone();
            let tools = self.ctx.tools.clone();
            let gate = self.ctx.gate.clone();
            let emitter = self.emitter();
            let settings = self.settings.clone();
            let cost = self.cost.clone();
            let cancel = self.cancel.child_token();
            let mut pause_rx = self.pause_tx.subscribe();

            join_set.spawn(async move {
                // A pause lifted mid-iteration stops follow-up dispatches
                while *pause_rx.borrow() {
                    if pause_rx.changed().await.is_err() {
                        break;
                    }
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let slot = settings.max_assistants - semaphore.available_permits() - 1;
                run_assistant_task(&mut task, slot, llm, tools, gate, emitter, &settings, cost, cancel).await;
                drop(permit);
                task
            });
        }

        let mut finished: Vec<AssistantTask> = Vec::new();
        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(task)) => finished.push(task),
                    Some(Err(e)) => warn!(error = %e, "assistant task panicked"),
                    None => break,
                },
                command = rx.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) == Effect::Stopped {
                            join_set.abort_all();
                            return false;
                        }
                    }
                    None => {
                        // Handle dropped: cancel and drain without polling rx
                        self.cancel.cancel();
                        while let Some(joined) = join_set.join_next().await {
                            if let Ok(task) = joined {
                                finished.push(task);
                            }
                        }
                        break;
                    }
                },
            }
        }

        for updated in finished {
            if let Some(slot) = tasks.iter_mut().find(|t| t.id == updated.id) {
                *slot = updated;
            }
        }
        true
    }

    /// Aggregating: tally statuses and ask the manager for a summary
    async fn aggregate(&mut self, tasks: &mut [AssistantTask], duration: Duration) {
        let mut report = IterationReport::tally(self.manager.iteration, tasks, duration.as_millis() as u64);

        if tasks.is_empty() {
            report.summary = "No work this iteration.".to_string();
        } else {
            let mut task_text = String::from("Assistant results:\n");
            for task in tasks.iter() {
                task_text.push_str(&format!(
                    "\n- [{}] {:?}: {}\n",
                    task.instruction,
                    task.status,
                    task.result.as_deref().unwrap_or("(no result)")
                ));
            }

            report.summary = match self.manager_summary(&task_text).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "aggregation summary failed");
                    format!("Aggregation unavailable ({}); see raw results.", e)
                }
            };
        }

        if self.settings.commentary_streaming_mode == CommentaryMode::CompleteThought {
            self.emitter().emit(EventKind::OrchestratorCommentary {
                text: report.summary.clone(),
            });
        }

        self.manager.totals = self.cost.snapshot();
        self.session.cost = self.manager.totals;
        match serde_json::to_value(&report) {
            Ok(json) => self.emitter().task_completed(json),
            Err(e) => warn!(error = %e, "report serialisation failed"),
        }
        self.manager.reports.push(report);
    }

    async fn manager_summary(&self, task_text: &str) -> Result<String, LlmError> {
        let mut config = role_config(Role::Manager);
        if config.model_override.is_none() {
            config.model_override = self.settings.manager_model.clone();
        }
        let model = config.model_override.clone().unwrap_or_else(|| "default".to_string());

        let system_prompt = render_prompt(&config.system_prompt, &PromptContext::for_task(task_text))
            .unwrap_or_else(|_| config.system_prompt.clone());

        let streaming = self.settings.commentary_streaming_mode == CommentaryMode::StreamingTokens;
        let mut agent = AgentHandle::new("manager", config, self.ctx.llm.clone(), self.emitter()).with_streaming(streaming);

        let input = AgentInput::new(
            system_prompt,
            vec![Message::user("Summarise this iteration for the user.")],
            self.manager.iteration as u32,
        );
        let output = tokio::time::timeout(self.settings.manager_llm_timeout(), agent.process(input, &self.cancel))
            .await
            .map_err(|_| LlmError::Timeout(self.settings.manager_llm_timeout()))??;
        agent.dispose();

        self.cost.record_turn(
            output.usage.input_tokens,
            output.usage.output_tokens,
            output.usage.cost_usd(&model),
        );
        Ok(output.message)
    }

    /// Resting: 1 Hz countdown, cancellable and overridable
    async fn rest(&mut self, rx: &mut mpsc::Receiver<OfficeCommand>) -> bool {
        let mut total = self.settings.rest_duration().as_secs();
        let mut remaining = total;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick is immediate

        while remaining > 0 {
            if self.cancel.is_cancelled() {
                return false;
            }

            if self.paused() {
                // Countdown frozen until resume
                match rx.recv().await {
                    Some(command) => {
                        if self.handle_command(command) == Effect::Stopped {
                            return false;
                        }
                        continue;
                    }
                    None => return false,
                }
            }

            self.emitter().rest_countdown(remaining, total);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                command = rx.recv() => match command {
                    Some(command) => match self.handle_command(command) {
                        Effect::Stopped => return false,
                        Effect::RestCancelled => break,
                        Effect::RestOverridden(minutes) => {
                            total = minutes * 60;
                            remaining = total;
                        }
                        Effect::None => {}
                    },
                    None => return false,
                },
                _ = interval.tick() => {
                    remaining -= 1;
                }
            }
        }

        self.emitter().rest_countdown(0, total);
        true
    }

    fn enter_error(&mut self, reason: &str) {
        warn!(session = %self.session.id, reason, "office session entered error state");
        self.fire(OfficeTrigger::Error, reason, None);
        self.emitter().task_aborted(reason);
    }

    /// After Stopped or Error: only Reset (to Idle) is meaningful
    async fn post_stop(&mut self, rx: &mut mpsc::Receiver<OfficeCommand>) {
        self.session.complete();
        if let Some(persistence) = &self.ctx.persistence {
            if let Err(e) = persistence.save_session(&self.session).await {
                warn!(error = %e, "session persistence failed");
            }
        }
        while let Some(command) = rx.recv().await {
            match command {
                OfficeCommand::Reset { correlation } => {
                    self.fire(OfficeTrigger::Reset, "reset to idle", Some(&correlation));
                    return;
                }
                OfficeCommand::Stop { .. } => {
                    // stop(); stop() is idempotent
                    debug!("stop ignored, already stopped");
                }
                other => debug!(?other, "command ignored after stop"),
            }
        }
    }
}

enum Fetched {
    Tasks(Vec<TaskSpec>),
    Stopped,
}

fn normalise(instruction: &str) -> String {
    instruction.trim().to_lowercase()
}

/// Run one assistant task: ephemeral agent, timeout, bounded retries
#[allow(clippy::too_many_arguments)]
async fn run_assistant_task(
    task: &mut AssistantTask,
    slot: usize,
    llm: Arc<dyn crate::llm::LlmClient>,
    tools: Option<Arc<crate::tools::SandboxedExecutor>>,
    gate: Arc<crate::tools::ApprovalGate>,
    emitter: EventEmitter,
    settings: &OfficeSettings,
    cost: Arc<CostTracker>,
    cancel: CancellationToken,
) {
    task.start(slot);
    emitter.worker_started(&task.id, Role::Assistant.name());

    let mut attempt = 0u32;
    loop {
        let mut config = role_config(Role::Assistant);
        if config.model_override.is_none() {
            config.model_override = settings.assistant_model.clone();
        }
        let model = config.model_override.clone().unwrap_or_else(|| "default".to_string());

        let ctx = PromptContext::for_task(&task.instruction)
            .with_working_dir(settings.workspace_path.display().to_string());
        let system_prompt = render_prompt(&config.system_prompt, &ctx).unwrap_or_else(|_| config.system_prompt.clone());

        let mut agent = AgentHandle::new(format!("assistant-{}", slot), config, llm.clone(), emitter.clone());
        if let Some(executor) = &tools {
            agent = agent.with_tools(executor.clone(), gate.clone());
        }

        let input = AgentInput::new(system_prompt, vec![Message::user(task.instruction.clone())], attempt + 1);
        let result = tokio::time::timeout(settings.assistant_timeout(), agent.process(input, &cancel)).await;
        agent.dispose();

        match result {
            Ok(Ok(output)) => {
                cost.record_turn(
                    output.usage.input_tokens,
                    output.usage.output_tokens,
                    output.usage.cost_usd(&model),
                );
                emitter.worker_completed(&task.id, &output.message);
                task.finish(TaskStatus::Completed, output.message);
                return;
            }
            Ok(Err(LlmError::Cancelled)) => {
                task.finish(TaskStatus::Cancelled, "cancelled");
                return;
            }
            Ok(Err(e)) => {
                if attempt < settings.max_retries {
                    attempt += 1;
                    task.retry_count = attempt;
                    emitter.worker_retrying(&task.id, attempt, &e.to_string());
                    continue;
                }
                emitter.worker_failed(&task.id, &e.to_string());
                task.finish(TaskStatus::Failed, e.to_string());
                return;
            }
            Err(_) => {
                let message = format!("timed out after {:?}", settings.assistant_timeout());
                if attempt < settings.max_retries {
                    attempt += 1;
                    task.retry_count = attempt;
                    emitter.worker_retrying(&task.id, attempt, &message);
                    continue;
                }
                emitter.worker_failed(&task.id, &message);
                task.finish(TaskStatus::TimedOut, message);
                return;
            }
        }
    }
}
