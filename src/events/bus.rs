//! Event bus - central pub/sub for driver lifecycle events
//!
//! Built on tokio broadcast channels: publishing never blocks, and a
//! subscriber that falls behind drops the oldest events rather than
//! stalling the drivers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Event, EventKind};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus, one instance per driver
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Publish an event to all subscribers
    ///
    /// Fire-and-forget: no subscribers is fine, and a full channel drops
    /// the oldest events for the lagging subscriber only.
    pub fn publish(&self, event: Event) {
        debug!(event_type = event.event_type(), session_id = %event.session_id, "EventBus::publish");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Create an emitter bound to a session
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            session_id: session_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create a shared event bus
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

/// Handle for components to emit session-scoped events without owning the bus
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    session_id: String,
}

impl EventEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit an event kind with this emitter's session id
    pub fn emit(&self, kind: EventKind) {
        let _ = self.tx.send(Event::new(self.session_id.clone(), kind));
    }

    /// Emit with a correlation id linking the event to a user command
    pub fn emit_correlated(&self, kind: EventKind, correlation_id: Option<&str>) {
        let mut event = Event::new(self.session_id.clone(), kind);
        if let Some(id) = correlation_id {
            event = event.with_correlation(id);
        }
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn phase_changed(&self, from: impl Into<String>, to: impl Into<String>, reason: &str, correlation: Option<&str>) {
        self.emit_correlated(
            EventKind::PhaseChanged {
                from: from.into(),
                to: to.into(),
                reason: reason.to_string(),
            },
            correlation,
        );
    }

    pub fn plan_created(&self, plan_id: &str, chunk_count: usize) {
        self.emit(EventKind::PlanCreated {
            plan_id: plan_id.to_string(),
            chunk_count,
        });
    }

    pub fn stage_started(&self, stage_index: usize, chunk_ids: Vec<String>) {
        self.emit(EventKind::StageStarted { stage_index, chunk_ids });
    }

    pub fn stage_completed(&self, stage_index: usize) {
        self.emit(EventKind::StageCompleted { stage_index });
    }

    pub fn worker_started(&self, worker_id: &str, role: &str) {
        self.emit(EventKind::WorkerStarted {
            worker_id: worker_id.to_string(),
            role: role.to_string(),
        });
    }

    pub fn worker_completed(&self, worker_id: &str, summary: &str) {
        self.emit(EventKind::WorkerCompleted {
            worker_id: worker_id.to_string(),
            summary: summary.to_string(),
        });
    }

    pub fn worker_failed(&self, worker_id: &str, error: &str) {
        self.emit(EventKind::WorkerFailed {
            worker_id: worker_id.to_string(),
            error: error.to_string(),
        });
    }

    pub fn worker_retrying(&self, worker_id: &str, attempt: u32, error: &str) {
        self.emit(EventKind::WorkerRetrying {
            worker_id: worker_id.to_string(),
            attempt,
            error: error.to_string(),
        });
    }

    pub fn tool_invocation(&self, agent_id: &str, tool: &str, args_summary: &str) {
        self.emit(EventKind::ToolInvocation {
            agent_id: agent_id.to_string(),
            tool: tool.to_string(),
            args_summary: args_summary.to_string(),
        });
    }

    pub fn tool_result(&self, agent_id: &str, tool: &str, success: bool, output_summary: &str, duration_ms: u64) {
        self.emit(EventKind::ToolResult {
            agent_id: agent_id.to_string(),
            tool: tool.to_string(),
            success,
            output_summary: output_summary.to_string(),
            duration_ms,
        });
    }

    pub fn clarification_requested(&self, questions: Vec<String>) {
        self.emit(EventKind::ClarificationRequested { questions });
    }

    pub fn clarification_received(&self, answer: &str, correlation: Option<&str>) {
        self.emit_correlated(
            EventKind::ClarificationReceived {
                answer: answer.to_string(),
            },
            correlation,
        );
    }

    pub fn injection_received(&self, instruction: &str, correlation: Option<&str>) {
        self.emit_correlated(
            EventKind::InjectionReceived {
                instruction: instruction.to_string(),
            },
            correlation,
        );
    }

    pub fn task_completed(&self, report: serde_json::Value) {
        self.emit(EventKind::TaskCompleted { report });
    }

    pub fn task_aborted(&self, reason: &str) {
        self.emit(EventKind::TaskAborted {
            reason: reason.to_string(),
        });
    }

    pub fn rest_countdown(&self, seconds_remaining: u64, total_seconds: u64) {
        self.emit(EventKind::RestCountdown {
            seconds_remaining,
            total_seconds,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_bus_creation() {
        let bus = EventBus::new(64);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_receive() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();

        bus.publish(Event::new("s1", EventKind::TaskAborted { reason: "x".into() }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.event_type(), "TaskAborted");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(64);
        // Must not panic or error
        bus.publish(Event::new("s1", EventKind::StageCompleted { stage_index: 0 }));
    }

    #[tokio::test]
    async fn test_emitter_binds_session() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("sess-9");

        emitter.worker_started("w1", "Implementation");
        emitter.worker_completed("w1", "done");

        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.session_id, "sess-9");
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_emitter_correlation() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("s");

        emitter.phase_changed("Idle", "Clarifying", "user submitted", Some("cmd-1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.correlation_id.as_deref(), Some("cmd-1"));

        emitter.phase_changed("Clarifying", "Failed", "timeout", None);
        let event = rx.recv().await.unwrap();
        assert!(event.correlation_id.is_none());
    }

    #[tokio::test]
    async fn test_event_order_preserved() {
        let bus = EventBus::new(128);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("s");

        emitter.stage_started(0, vec!["c1".into()]);
        emitter.worker_started("c1", "Generic");
        emitter.worker_completed("c1", "ok");
        emitter.stage_completed(0);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_type());
        }
        assert_eq!(
            names,
            vec!["StageStarted", "WorkerStarted", "WorkerCompleted", "StageCompleted"]
        );
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish(Event::new(
                "s",
                EventKind::RestCountdown {
                    seconds_remaining: i,
                    total_seconds: 10,
                },
            ));
        }

        match rx.recv().await {
            Ok(event) => assert_eq!(event.event_type(), "RestCountdown"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                assert!(missed > 0);
                let event = rx.recv().await.unwrap();
                assert_eq!(event.event_type(), "RestCountdown");
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
}
