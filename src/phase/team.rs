//! Team orchestrator phases

use serde::{Deserialize, Serialize};

use super::machine::PhaseMachine;

/// Lifecycle phases of a Team session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamPhase {
    Idle,
    Clarifying,
    AwaitingApproval,
    Planning,
    Executing,
    Synthesising,
    Completed,
    Cancelled,
    Failed,
}

impl TeamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }
}

impl std::fmt::Display for TeamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Events that drive the Team machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamTrigger {
    UserSubmitted,
    PlanProposed,
    UserApproved,
    UserRejected,
    StagesReady,
    ExecutionFinished,
    SynthesisComplete,
    UserCancelled,
    Error,
    Reset,
}

/// Build the Team phase machine
///
/// Cancelled and Failed are reachable from every active phase; terminals
/// reset to Idle.
pub fn team_machine() -> PhaseMachine<TeamPhase, TeamTrigger> {
    use TeamPhase::*;
    use TeamTrigger::*;

    let mut edges = vec![
        (Idle, UserSubmitted, Clarifying),
        (Clarifying, PlanProposed, AwaitingApproval),
        (AwaitingApproval, UserApproved, Planning),
        (AwaitingApproval, UserRejected, Clarifying),
        (Planning, StagesReady, Executing),
        (Executing, ExecutionFinished, Synthesising),
        (Synthesising, SynthesisComplete, Completed),
    ];
    for phase in [Clarifying, AwaitingApproval, Planning, Executing, Synthesising] {
        edges.push((phase, UserCancelled, Cancelled));
        edges.push((phase, Error, Failed));
    }
    for terminal in [Completed, Cancelled, Failed] {
        edges.push((terminal, Reset, Idle));
    }
    PhaseMachine::new(Idle, &edges)
}
