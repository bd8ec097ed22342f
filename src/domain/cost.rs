//! Cumulative cost tracking
//!
//! A [`CostEstimate`] is an immutable value; each completed turn produces
//! a new instance via [`CostEstimate::add_turn`]. Totals never decrease.

use serde::{Deserialize, Serialize};

/// Accumulated token and dollar totals for a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_usd: f64,
    pub turns: u32,
}

impl CostEstimate {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Fold one completed turn into the estimate, producing a new value
    pub fn add_turn(&self, input_tokens: u64, output_tokens: u64, usd: f64) -> Self {
        Self {
            input_tokens: self.input_tokens + input_tokens,
            output_tokens: self.output_tokens + output_tokens,
            total_tokens: self.total_tokens + input_tokens + output_tokens,
            estimated_usd: self.estimated_usd + usd.max(0.0),
            turns: self.turns + 1,
        }
    }
}

/// Shared, append-only cost accumulator
///
/// Workers running in parallel record turns here; the driver folds the
/// snapshot into the session at safe points.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: std::sync::Mutex<CostEstimate>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_turn(&self, input_tokens: u64, output_tokens: u64, usd: f64) {
        let mut cost = self.inner.lock().expect("cost lock poisoned");
        *cost = cost.add_turn(input_tokens, output_tokens, usd);
    }

    pub fn snapshot(&self) -> CostEstimate {
        *self.inner.lock().expect("cost lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_turn_accumulates() {
        let cost = CostEstimate::zero().add_turn(100, 50, 0.01).add_turn(200, 80, 0.02);
        assert_eq!(cost.input_tokens, 300);
        assert_eq!(cost.output_tokens, 130);
        assert_eq!(cost.total_tokens, 430);
        assert_eq!(cost.turns, 2);
        assert!((cost.estimated_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_monotone_totals() {
        let mut cost = CostEstimate::zero();
        for i in 0..20 {
            let next = cost.add_turn(i, i * 2, 0.001);
            assert!(next.total_tokens >= cost.total_tokens);
            assert!(next.estimated_usd >= cost.estimated_usd);
            cost = next;
        }
    }

    #[test]
    fn test_negative_usd_clamped() {
        let cost = CostEstimate::zero().add_turn(10, 10, -1.0);
        assert_eq!(cost.estimated_usd, 0.0);
    }
}
