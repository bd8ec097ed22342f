//! Generic deterministic finite state machine

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, warn};

/// A completed state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// Deterministic FSM over declared (state, trigger) -> state edges
pub struct PhaseMachine<S, T> {
    state: S,
    edges: HashMap<(S, T), S>,
}

impl<S, T> PhaseMachine<S, T>
where
    S: Copy + Eq + Hash + Debug,
    T: Copy + Eq + Hash + Debug,
{
    pub fn new(initial: S, edges: &[(S, T, S)]) -> Self {
        let edges = edges.iter().map(|&(from, trigger, to)| ((from, trigger), to)).collect();
        Self { state: initial, edges }
    }

    pub fn state(&self) -> S {
        self.state
    }

    /// Whether `trigger` has an edge from the current state
    pub fn can_fire(&self, trigger: T) -> bool {
        self.edges.contains_key(&(self.state, trigger))
    }

    /// Triggers with an edge from the current state
    pub fn permitted_triggers(&self) -> Vec<T> {
        self.edges
            .keys()
            .filter(|(from, _)| *from == self.state)
            .map(|&(_, trigger)| trigger)
            .collect()
    }

    /// Fire a trigger
    ///
    /// Returns the transition taken, or None if the trigger has no edge
    /// from the current state - in which case the state is unchanged and
    /// a warning is logged.
    pub fn fire(&mut self, trigger: T) -> Option<Transition<S>> {
        match self.edges.get(&(self.state, trigger)) {
            Some(&to) => {
                let from = self.state;
                self.state = to;
                debug!(?from, ?trigger, ?to, "PhaseMachine::fire");
                Some(Transition { from, to })
            }
            None => {
                warn!(state = ?self.state, ?trigger, "PhaseMachine::fire: unhandled trigger (ignored)");
                None
            }
        }
    }

    /// Restore a specific state, bypassing the edge table
    ///
    /// Used only to resume a paused driver back into the phase it was
    /// frozen in; ordinary control flow goes through [`fire`](Self::fire).
    pub(crate) fn restore(&mut self, state: S) -> Transition<S> {
        let from = self.state;
        self.state = state;
        debug!(?from, to = ?state, "PhaseMachine::restore");
        Transition { from, to: state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum T {
        Go,
        Back,
        Jump,
    }

    fn machine() -> PhaseMachine<S, T> {
        PhaseMachine::new(S::A, &[(S::A, T::Go, S::B), (S::B, T::Go, S::C), (S::B, T::Back, S::A)])
    }

    #[test]
    fn test_fire_valid() {
        let mut m = machine();
        let t = m.fire(T::Go).unwrap();
        assert_eq!(t, Transition { from: S::A, to: S::B });
        assert_eq!(m.state(), S::B);
    }

    #[test]
    fn test_fire_invalid_is_swallowed() {
        let mut m = machine();
        assert!(m.fire(T::Back).is_none());
        assert_eq!(m.state(), S::A);
        assert!(m.fire(T::Jump).is_none());
        assert_eq!(m.state(), S::A);
    }

    #[test]
    fn test_can_fire_and_permitted() {
        let mut m = machine();
        assert!(m.can_fire(T::Go));
        assert!(!m.can_fire(T::Back));
        m.fire(T::Go);
        let mut permitted = m.permitted_triggers();
        permitted.sort_by_key(|t| format!("{:?}", t));
        assert_eq!(permitted, vec![T::Back, T::Go]);
    }

    #[test]
    fn test_restore_bypasses_edges() {
        let mut m = machine();
        m.fire(T::Go);
        m.fire(T::Go);
        let t = m.restore(S::A);
        assert_eq!(t, Transition { from: S::C, to: S::A });
        assert_eq!(m.state(), S::A);
    }
}
