//! Consolidated report and synthesis markers

use serde::{Deserialize, Serialize};

use crate::domain::{ChunkResult, CostEstimate};

/// Final report of a Team run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    /// Conversational summary with action markers stripped
    pub summary: String,
    /// Follow-ups extracted from `[ACTION:…]` markers
    pub next_steps: Vec<String>,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    pub cancelled_chunks: usize,
    pub worker_results: Vec<ChunkResult>,
    pub cost: CostEstimate,
}

/// Extract `[ACTION:…]` markers from a synthesis
///
/// The prefix matches case-insensitively and each marker ends at the
/// first `]`. Returns the text with markers removed plus the actions in
/// order of appearance.
pub fn extract_action_markers(text: &str) -> (String, Vec<String>) {
    const PREFIX: &[u8] = b"[ACTION:";

    let bytes = text.as_bytes();
    let mut cleaned = String::with_capacity(text.len());
    let mut actions = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let is_marker = bytes[pos] == b'['
            && bytes.len() - pos >= PREFIX.len()
            && bytes[pos..pos + PREFIX.len()].eq_ignore_ascii_case(PREFIX);

        if is_marker {
            let body_start = pos + PREFIX.len();
            match bytes[body_start..].iter().position(|&b| b == b']') {
                Some(rel_end) => {
                    let body = &text[body_start..body_start + rel_end];
                    actions.push(body.trim().to_string());
                    pos = body_start + rel_end + 1;
                    continue;
                }
                // Unterminated marker: keep as literal text
                None => {}
            }
        }

        // Advance one char (ASCII scan, but respect multi-byte chars)
        let ch_len = text[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        cleaned.push_str(&text[pos..pos + ch_len]);
        pos += ch_len;
    }

    (collapse_blank_runs(&cleaned), actions)
}

/// Stripping markers can leave doubled spaces and blank lines behind
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_marker() {
        let (clean, actions) = extract_action_markers("Done. [ACTION: run the tests] All good.");
        assert_eq!(actions, vec!["run the tests"]);
        assert!(!clean.contains("ACTION"));
        assert!(clean.contains("Done."));
        assert!(clean.contains("All good."));
    }

    #[test]
    fn test_extract_case_insensitive() {
        let (_, actions) = extract_action_markers("[action:first][Action: second]");
        assert_eq!(actions, vec!["first", "second"]);
    }

    #[test]
    fn test_no_markers() {
        let (clean, actions) = extract_action_markers("Nothing to do here.");
        assert_eq!(clean, "Nothing to do here.");
        assert!(actions.is_empty());
    }

    #[test]
    fn test_unterminated_marker_kept_literal() {
        let (clean, actions) = extract_action_markers("Broken [ACTION: no close");
        assert!(actions.is_empty());
        assert!(clean.contains("[ACTION: no close"));
    }

    #[test]
    fn test_markers_on_own_lines_leave_no_blank_gaps() {
        let text = "Summary line.\n[ACTION: step one]\n[ACTION: step two]\nCloser.";
        let (clean, actions) = extract_action_markers(text);
        assert_eq!(actions, vec!["step one", "step two"]);
        assert!(!clean.contains("\n\n\n"));
    }

    #[test]
    fn test_report_serialises() {
        let report = ConsolidatedReport {
            summary: "ok".into(),
            next_steps: vec!["do more".into()],
            succeeded_chunks: 2,
            failed_chunks: 0,
            cancelled_chunks: 0,
            worker_results: vec![],
            cost: CostEstimate::zero(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["next_steps"][0], "do more");
        assert_eq!(json["succeeded_chunks"], 2);
    }
}
