//! Assistant tasks and iteration reports (Office)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::priority::Priority;

/// Runtime status of an assistant task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut)
    }
}

/// What the scheduler decided to do with a fetched task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SchedulingDecision {
    /// Sent straight to a free assistant slot
    Dispatched { assistant_index: usize },
    /// Parked in the queue behind `position` earlier tasks
    Queued { position: usize },
    /// Dropped because the queue was full
    Skipped { reason: String },
    /// Pushed to a later iteration
    Deferred { until_iteration: u64 },
    /// Folded into an equivalent task from the same iteration
    Merged { into_task: String },
}

/// One unit of work dispatched to an ephemeral assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantTask {
    pub id: String,
    pub iteration: u64,
    pub instruction: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Which assistant slot ran the task, once running
    pub assistant_index: Option<usize>,
    pub decision: Option<SchedulingDecision>,
    /// Assistant output on completion; error text on failure
    pub result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AssistantTask {
    pub fn new(iteration: u64, instruction: impl Into<String>, priority: Priority) -> Self {
        let instruction = instruction.into();
        Self {
            id: generate_id("task", &instruction),
            iteration,
            instruction,
            priority,
            status: TaskStatus::Queued,
            retry_count: 0,
            assistant_index: None,
            decision: None,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self, assistant_index: usize) {
        self.status = TaskStatus::Running;
        self.assistant_index = Some(assistant_index);
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: TaskStatus, result: impl Into<String>) {
        self.status = status;
        self.result = Some(result.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Per-iteration aggregate produced by the manager
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IterationReport {
    pub iteration: u64,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub queued: usize,
    pub duration_ms: u64,
    /// Manager's markdown summary of the iteration
    pub summary: String,
    #[serde(default)]
    pub commentary: Vec<String>,
    /// Hints the manager wants carried into the next iteration
    #[serde(default)]
    pub next_iteration_hints: Vec<String>,
}

impl IterationReport {
    /// Build the counts from a set of finished tasks
    pub fn tally(iteration: u64, tasks: &[AssistantTask], duration_ms: u64) -> Self {
        let mut report = Self {
            iteration,
            duration_ms,
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Completed => report.completed += 1,
                TaskStatus::Failed => report.failed += 1,
                TaskStatus::Cancelled => report.cancelled += 1,
                TaskStatus::TimedOut => report.timed_out += 1,
                TaskStatus::Queued => report.queued += 1,
                TaskStatus::Running => {}
            }
            if matches!(task.decision, Some(SchedulingDecision::Skipped { .. })) {
                report.skipped += 1;
            }
        }
        report
    }

    pub fn task_count(&self) -> usize {
        self.completed + self.failed + self.cancelled + self.timed_out + self.queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let mut task = AssistantTask::new(3, "tidy the backlog", Priority::High);
        assert_eq!(task.status, TaskStatus::Queued);

        task.start(1);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assistant_index, Some(1));
        assert!(task.started_at.is_some());

        task.finish(TaskStatus::Completed, "done");
        assert!(task.status.is_terminal());
        assert_eq!(task.result.as_deref(), Some("done"));
    }

    #[test]
    fn test_report_tally() {
        let mut done = AssistantTask::new(1, "a", Priority::Normal);
        done.finish(TaskStatus::Completed, "ok");
        let mut failed = AssistantTask::new(1, "b", Priority::Normal);
        failed.finish(TaskStatus::Failed, "boom");
        let mut skipped = AssistantTask::new(1, "c", Priority::Low);
        skipped.decision = Some(SchedulingDecision::Skipped {
            reason: "queue full".into(),
        });

        let report = IterationReport::tally(1, &[done, failed, skipped], 1500);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.queued, 1); // skipped task never left Queued
        assert_eq!(report.duration_ms, 1500);
    }

    #[test]
    fn test_scheduling_decision_serde() {
        let decision = SchedulingDecision::Dispatched { assistant_index: 2 };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("dispatched"));
        let parsed: SchedulingDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }
}
