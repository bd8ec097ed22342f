//! Phase state machines for the three drivers
//!
//! One generic deterministic machine, three declared edge tables. Firing
//! a trigger with no edge from the current state is logged and swallowed,
//! never an error - the UI may race internal timers.

mod machine;
mod office;
mod panel;
mod team;

pub use machine::{PhaseMachine, Transition};
pub use office::{OfficePhase, OfficeTrigger, office_machine};
pub use panel::{PanelPhase, PanelTrigger, panel_machine};
pub use team::{TeamPhase, TeamTrigger, team_machine};
