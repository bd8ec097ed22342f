//! Panel discussion phases

use serde::{Deserialize, Serialize};

use super::machine::PhaseMachine;

/// Lifecycle phases of a Panel discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanelPhase {
    Idle,
    Clarifying,
    AwaitingApproval,
    Preparing,
    Running,
    Paused,
    Converging,
    Synthesising,
    Completed,
    Stopped,
    Failed,
}

impl PanelPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }
}

impl std::fmt::Display for PanelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Events that drive the Panel machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelTrigger {
    UserSubmitted,
    UserApproved,
    UserRejected,
    UserPaused,
    UserResumed,
    UserStopped,
    UserCancelled,
    ClarificationsComplete,
    PanelistsReady,
    ConvergenceDetected,
    StartSynthesis,
    ResumeDebate,
    SynthesisComplete,
    Timeout,
    Error,
    Reset,
}

/// Build the Panel phase machine
///
/// Guard-rail breaches fire Timeout, which forces Converging just like a
/// detected convergence. All terminals reset to Idle.
pub fn panel_machine() -> PhaseMachine<PanelPhase, PanelTrigger> {
    use PanelPhase::*;
    use PanelTrigger::*;

    let mut edges = vec![
        (Idle, UserSubmitted, Clarifying),
        (Clarifying, ClarificationsComplete, AwaitingApproval),
        (AwaitingApproval, UserApproved, Preparing),
        (AwaitingApproval, UserRejected, Clarifying),
        (Preparing, PanelistsReady, Running),
        (Running, UserPaused, Paused),
        (Paused, UserResumed, Running),
        (Running, ConvergenceDetected, Converging),
        (Running, Timeout, Converging),
        (Converging, StartSynthesis, Synthesising),
        (Converging, ResumeDebate, Running),
        (Synthesising, SynthesisComplete, Completed),
    ];
    for phase in [Clarifying, AwaitingApproval, Preparing, Running, Paused, Converging, Synthesising] {
        edges.push((phase, UserStopped, Stopped));
        edges.push((phase, UserCancelled, Stopped));
        edges.push((phase, Error, Failed));
    }
    for terminal in [Completed, Stopped, Failed] {
        edges.push((terminal, Reset, Idle));
    }
    PhaseMachine::new(Idle, &edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_discussion_path() {
        let mut m = panel_machine();
        for trigger in [
            PanelTrigger::UserSubmitted,
            PanelTrigger::ClarificationsComplete,
            PanelTrigger::UserApproved,
            PanelTrigger::PanelistsReady,
            PanelTrigger::ConvergenceDetected,
            PanelTrigger::StartSynthesis,
            PanelTrigger::SynthesisComplete,
        ] {
            assert!(m.fire(trigger).is_some(), "trigger {:?} should fire", trigger);
        }
        assert_eq!(m.state(), PanelPhase::Completed);
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let mut m = panel_machine();
        m.fire(PanelTrigger::UserSubmitted);
        m.fire(PanelTrigger::ClarificationsComplete);
        m.fire(PanelTrigger::UserApproved);
        m.fire(PanelTrigger::PanelistsReady);

        m.fire(PanelTrigger::UserPaused);
        assert_eq!(m.state(), PanelPhase::Paused);
        m.fire(PanelTrigger::UserResumed);
        assert_eq!(m.state(), PanelPhase::Running);
    }

    #[test]
    fn test_guard_rail_timeout_forces_converging() {
        let mut m = panel_machine();
        m.fire(PanelTrigger::UserSubmitted);
        m.fire(PanelTrigger::ClarificationsComplete);
        m.fire(PanelTrigger::UserApproved);
        m.fire(PanelTrigger::PanelistsReady);

        m.fire(PanelTrigger::Timeout);
        assert_eq!(m.state(), PanelPhase::Converging);
    }

    #[test]
    fn test_converging_can_resume_debate() {
        let mut m = panel_machine();
        m.fire(PanelTrigger::UserSubmitted);
        m.fire(PanelTrigger::ClarificationsComplete);
        m.fire(PanelTrigger::UserApproved);
        m.fire(PanelTrigger::PanelistsReady);
        m.fire(PanelTrigger::ConvergenceDetected);
        m.fire(PanelTrigger::ResumeDebate);
        assert_eq!(m.state(), PanelPhase::Running);
    }

    #[test]
    fn test_all_terminals_reset_to_idle() {
        // Completed
        let mut m = panel_machine();
        for t in [
            PanelTrigger::UserSubmitted,
            PanelTrigger::ClarificationsComplete,
            PanelTrigger::UserApproved,
            PanelTrigger::PanelistsReady,
            PanelTrigger::ConvergenceDetected,
            PanelTrigger::StartSynthesis,
            PanelTrigger::SynthesisComplete,
        ] {
            m.fire(t);
        }
        assert!(m.fire(PanelTrigger::Reset).is_some());
        assert_eq!(m.state(), PanelPhase::Idle);

        // Stopped and Failed
        for terminal_trigger in [PanelTrigger::UserStopped, PanelTrigger::Error] {
            let mut m = panel_machine();
            m.fire(PanelTrigger::UserSubmitted);
            m.fire(terminal_trigger);
            assert!(m.state().is_terminal());
            m.fire(PanelTrigger::Reset);
            assert_eq!(m.state(), PanelPhase::Idle);
        }
    }

    #[test]
    fn test_invalid_trigger_emits_nothing() {
        let mut m = panel_machine();
        assert!(m.fire(PanelTrigger::StartSynthesis).is_none());
        assert_eq!(m.state(), PanelPhase::Idle);
    }
}
