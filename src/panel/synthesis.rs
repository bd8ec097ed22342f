//! Panel synthesis and the knowledge brief

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Consolidated outcome of a panel discussion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PanelSynthesis {
    pub consolidated_answer: String,
    /// Arguments grouped by panelist perspective
    pub arguments_by_perspective: BTreeMap<String, Vec<String>>,
    pub consensus_points: Vec<String>,
    pub dissenting_points: Vec<String>,
    pub recommendations: Vec<String>,
    /// 0-100
    pub confidence: u8,
    pub follow_up_areas: Vec<String>,
}

/// Parse the head's synthesis reply; falls back to a minimal synthesis
/// built from the raw text and transcript so completion never fails on
/// formatting.
pub fn parse_synthesis(text: &str, transcript: &[(String, String)]) -> PanelSynthesis {
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    };
    if let Ok(synthesis) = serde_json::from_str::<PanelSynthesis>(candidate) {
        if !synthesis.consolidated_answer.is_empty() {
            return synthesis;
        }
    }

    debug!("synthesis parse failed, building fallback from transcript");
    let mut by_perspective: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (speaker, contribution) in transcript {
        by_perspective
            .entry(speaker.clone())
            .or_default()
            .push(contribution.clone());
    }
    PanelSynthesis {
        consolidated_answer: text.to_string(),
        arguments_by_perspective: by_perspective,
        confidence: 0,
        ..Default::default()
    }
}

/// Compressed record of a finished discussion (~2K tokens)
///
/// Follow-up questions are answered from this brief alone; the full
/// transcript is never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBrief {
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

impl KnowledgeBrief {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generated_at: Utc::now(),
        }
    }
}
