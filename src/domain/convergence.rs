//! Convergence evaluation results (Panel)

use serde::{Deserialize, Serialize};

/// How a convergence check concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Evaluation ran and produced a score
    Completed,
    /// Too few turns to judge
    TooEarly,
    /// Not due this turn
    Skipped,
    /// Moderator output could not be parsed
    ParseError,
    /// Evaluation call failed
    Error,
}

/// Outcome of one convergence evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceResult {
    /// Agreement score 0-100
    pub score: u8,
    pub converged: bool,
    pub explanation: String,
    pub status: ConvergenceStatus,
}

impl ConvergenceResult {
    pub fn completed(score: u8, threshold: u8, explanation: impl Into<String>) -> Self {
        let score = score.min(100);
        Self {
            score,
            converged: score >= threshold,
            explanation: explanation.into(),
            status: ConvergenceStatus::Completed,
        }
    }

    pub fn inconclusive(status: ConvergenceStatus, explanation: impl Into<String>) -> Self {
        Self {
            score: 0,
            converged: false,
            explanation: explanation.into(),
            status,
        }
    }

    /// Anything but a converged Completed result keeps the debate going
    pub fn continues_discussion(&self) -> bool {
        !(self.status == ConvergenceStatus::Completed && self.converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converged_at_threshold() {
        let result = ConvergenceResult::completed(80, 80, "stable agreement");
        assert!(result.converged);
        assert!(!result.continues_discussion());
    }

    #[test]
    fn test_below_threshold_continues() {
        let result = ConvergenceResult::completed(79, 80, "still moving");
        assert!(!result.converged);
        assert!(result.continues_discussion());
    }

    #[test]
    fn test_score_clamped() {
        let result = ConvergenceResult::completed(130, 80, "");
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_inconclusive_statuses_continue() {
        for status in [
            ConvergenceStatus::TooEarly,
            ConvergenceStatus::Skipped,
            ConvergenceStatus::ParseError,
            ConvergenceStatus::Error,
        ] {
            assert!(ConvergenceResult::inconclusive(status, "").continues_discussion());
        }
    }
}
