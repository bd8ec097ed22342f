//! Agent role catalogue
//!
//! Roles are a closed set; per-role instructions, tool preferences, and
//! model overrides live in [`crate::agent::RoleConfig`].

use serde::{Deserialize, Serialize};

/// Every role an agent can be spawned with, across all three drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    // Team workers
    Planning,
    CodeAnalysis,
    MemoryDiagnostics,
    Performance,
    Testing,
    Implementation,
    Synthesis,
    Generic,
    // Panel
    Head,
    Moderator,
    Panelist,
    // Office
    Manager,
    Assistant,
}

impl Role {
    /// Roles that coordinate other agents rather than doing chunk work
    pub fn is_coordinator(&self) -> bool {
        matches!(self, Role::Planning | Role::Head | Role::Moderator | Role::Manager)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Planning => "Planning",
            Role::CodeAnalysis => "CodeAnalysis",
            Role::MemoryDiagnostics => "MemoryDiagnostics",
            Role::Performance => "Performance",
            Role::Testing => "Testing",
            Role::Implementation => "Implementation",
            Role::Synthesis => "Synthesis",
            Role::Generic => "Generic",
            Role::Head => "Head",
            Role::Moderator => "Moderator",
            Role::Panelist => "Panelist",
            Role::Manager => "Manager",
            Role::Assistant => "Assistant",
        }
    }

    /// Parse a role name as it appears in plan JSON (`assignedRole`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Planning" => Some(Role::Planning),
            "CodeAnalysis" => Some(Role::CodeAnalysis),
            "MemoryDiagnostics" => Some(Role::MemoryDiagnostics),
            "Performance" => Some(Role::Performance),
            "Testing" => Some(Role::Testing),
            "Implementation" => Some(Role::Implementation),
            "Synthesis" => Some(Role::Synthesis),
            "Generic" => Some(Role::Generic),
            "Head" => Some(Role::Head),
            "Moderator" => Some(Role::Moderator),
            "Panelist" => Some(Role::Panelist),
            "Manager" => Some(Role::Manager),
            "Assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Planning, Role::Synthesis, Role::Head, Role::Assistant] {
            assert_eq!(Role::parse(role.name()), Some(role));
        }
    }

    #[test]
    fn test_unknown_role() {
        assert_eq!(Role::parse("Wizard"), None);
    }

    #[test]
    fn test_coordinator_roles() {
        assert!(Role::Manager.is_coordinator());
        assert!(Role::Moderator.is_coordinator());
        assert!(!Role::Implementation.is_coordinator());
        assert!(!Role::Assistant.is_coordinator());
    }
}
