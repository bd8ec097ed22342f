//! Moderator decisions and convergence evaluation
//!
//! The moderator answers in JSON. Parsing is fail-open: a malformed
//! answer falls back to round-robin with no stop, so a bad moderator
//! turn can never silently end the discussion.

use serde::Deserialize;
use tracing::debug;

use crate::domain::{ConvergenceResult, ConvergenceStatus};

/// What the moderator wants to happen next
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ModeratorDecision {
    /// Persona to speak next; None = round-robin
    pub next_speaker: Option<String>,
    /// Moderator's running agreement estimate, 0-100
    pub convergence_score: u8,
    pub stop_discussion: bool,
    pub allow_parallel_thinking: bool,
    /// Panelists to think in parallel (honoured for 2-3 names)
    pub parallel_group: Vec<String>,
    /// Steering message prepended to the next speaker's prompt
    pub redirect_message: Option<String>,
}

impl ModeratorDecision {
    /// Round-robin, keep talking; used when the moderator reply is unusable
    pub fn fallback() -> Self {
        Self::default()
    }

    /// Parallel thinking only applies to groups of 2 or 3
    pub fn parallel_group_valid(&self) -> bool {
        self.allow_parallel_thinking && (2..=3).contains(&self.parallel_group.len())
    }
}

/// Pull the first JSON object out of the moderator's reply
pub fn parse_decision(text: &str) -> Option<ModeratorDecision> {
    if let Ok(decision) = serde_json::from_str::<ModeratorDecision>(text.trim()) {
        return Some(decision);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<ModeratorDecision>(&text[start..=end]) {
        Ok(decision) => Some(decision),
        Err(e) => {
            debug!(error = %e, "moderator decision parse failed");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConvergenceAnswer {
    score: u8,
    #[serde(default)]
    explanation: String,
}

/// Parse a convergence evaluation reply into a result
pub fn parse_convergence(text: &str, threshold: u8) -> ConvergenceResult {
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    };
    match serde_json::from_str::<ConvergenceAnswer>(candidate) {
        Ok(answer) => ConvergenceResult::completed(answer.score, threshold, answer.explanation),
        Err(e) => {
            debug!(error = %e, "convergence parse failed");
            ConvergenceResult::inconclusive(ConvergenceStatus::ParseError, format!("unparseable evaluation: {}", e))
        }
    }
}
