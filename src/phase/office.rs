//! Office manager loop phases

use serde::{Deserialize, Serialize};

use super::machine::PhaseMachine;

/// Lifecycle phases of the Office manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfficePhase {
    Idle,
    Clarifying,
    AwaitingApproval,
    FetchingEvents,
    Scheduling,
    Executing,
    Aggregating,
    Resting,
    Paused,
    Stopped,
    Error,
}

impl OfficePhase {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Paused | Self::Stopped | Self::Error)
    }

    /// Phases that form the iteration cycle
    pub fn in_iteration_cycle(self) -> bool {
        matches!(
            self,
            Self::FetchingEvents | Self::Scheduling | Self::Executing | Self::Aggregating | Self::Resting
        )
    }
}

impl std::fmt::Display for OfficePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Events that drive the Office machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfficeTrigger {
    UserSubmitted,
    ClarificationsComplete,
    UserApproved,
    UserRejected,
    TasksFetched,
    NoTasks,
    TasksScheduled,
    ExecutionFinished,
    ReportReady,
    RestElapsed,
    UserPaused,
    UserResumed,
    UserStopped,
    Error,
    Reset,
}

/// Build the Office phase machine
///
/// The iteration cycle loops FetchingEvents -> Scheduling -> Executing ->
/// Aggregating -> Resting -> FetchingEvents. Pause is legal from any
/// active phase; resume restores the frozen phase via the driver. Error
/// is recoverable through Reset.
pub fn office_machine() -> PhaseMachine<OfficePhase, OfficeTrigger> {
    use OfficePhase::*;
    use OfficeTrigger::*;

    let mut edges = vec![
        (Idle, UserSubmitted, Clarifying),
        (Clarifying, ClarificationsComplete, AwaitingApproval),
        (AwaitingApproval, UserApproved, FetchingEvents),
        (AwaitingApproval, UserRejected, Clarifying),
        (FetchingEvents, TasksFetched, Scheduling),
        (FetchingEvents, NoTasks, Aggregating),
        (Scheduling, TasksScheduled, Executing),
        (Executing, ExecutionFinished, Aggregating),
        (Aggregating, ReportReady, Resting),
        (Resting, RestElapsed, FetchingEvents),
        // Resume's static edge re-enters the cycle; the driver restores
        // the exact frozen phase when it differs.
        (Paused, UserResumed, FetchingEvents),
        (Stopped, Reset, Idle),
        (OfficePhase::Error, Reset, Idle),
    ];
    for phase in [
        Clarifying,
        AwaitingApproval,
        FetchingEvents,
        Scheduling,
        Executing,
        Aggregating,
        Resting,
    ] {
        edges.push((phase, UserPaused, Paused));
        edges.push((phase, UserStopped, Stopped));
        edges.push((phase, OfficeTrigger::Error, OfficePhase::Error));
    }
    edges.push((Paused, UserStopped, Stopped));
    PhaseMachine::new(Idle, &edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_to_cycle(m: &mut PhaseMachine<OfficePhase, OfficeTrigger>) {
        m.fire(OfficeTrigger::UserSubmitted);
        m.fire(OfficeTrigger::ClarificationsComplete);
        m.fire(OfficeTrigger::UserApproved);
    }

    #[test]
    fn test_iteration_cycle_loops() {
        let mut m = office_machine();
        advance_to_cycle(&mut m);
        assert_eq!(m.state(), OfficePhase::FetchingEvents);

        for _ in 0..3 {
            m.fire(OfficeTrigger::TasksFetched);
            m.fire(OfficeTrigger::TasksScheduled);
            m.fire(OfficeTrigger::ExecutionFinished);
            m.fire(OfficeTrigger::ReportReady);
            assert_eq!(m.state(), OfficePhase::Resting);
            m.fire(OfficeTrigger::RestElapsed);
            assert_eq!(m.state(), OfficePhase::FetchingEvents);
        }
    }

    #[test]
    fn test_no_work_short_circuits_to_aggregating() {
        let mut m = office_machine();
        advance_to_cycle(&mut m);
        m.fire(OfficeTrigger::NoTasks);
        assert_eq!(m.state(), OfficePhase::Aggregating);
    }

    #[test]
    fn test_pause_from_resting_and_restore() {
        let mut m = office_machine();
        advance_to_cycle(&mut m);
        m.fire(OfficeTrigger::TasksFetched);
        m.fire(OfficeTrigger::TasksScheduled);
        m.fire(OfficeTrigger::ExecutionFinished);
        m.fire(OfficeTrigger::ReportReady);

        m.fire(OfficeTrigger::UserPaused);
        assert_eq!(m.state(), OfficePhase::Paused);
        // Driver restores the frozen phase on resume
        m.restore(OfficePhase::Resting);
        assert_eq!(m.state(), OfficePhase::Resting);
    }

    #[test]
    fn test_error_recoverable_via_reset() {
        let mut m = office_machine();
        advance_to_cycle(&mut m);
        m.fire(OfficeTrigger::Error);
        assert_eq!(m.state(), OfficePhase::Error);
        m.fire(OfficeTrigger::Reset);
        assert_eq!(m.state(), OfficePhase::Idle);
    }

    #[test]
    fn test_stop_from_paused() {
        let mut m = office_machine();
        advance_to_cycle(&mut m);
        m.fire(OfficeTrigger::UserPaused);
        m.fire(OfficeTrigger::UserStopped);
        assert_eq!(m.state(), OfficePhase::Stopped);
    }

    #[test]
    fn test_invalid_trigger_ignored() {
        let mut m = office_machine();
        assert!(m.fire(OfficeTrigger::RestElapsed).is_none());
        assert_eq!(m.state(), OfficePhase::Idle);
    }
}
