//! Tool approval gate
//!
//! Every tool-use request consults, in order: per-session rules, global
//! rules, then the user via an `ApprovalRequested` event paired with a
//! oneshot response channel. The gate fails closed: a dismissed prompt
//! records a denial.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::generate_id;
use crate::events::{EventEmitter, EventKind};

/// How long an approval decision is remembered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    #[default]
    Once,
    Session,
    Global,
}

/// A remembered approval or denial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    /// Tool name or wildcard pattern; `server(*)` matches every tool on
    /// that server.
    pub tool_pattern: String,
    pub approved: bool,
    pub scope: ApprovalScope,
    /// Set when scope is Session
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRule {
    pub fn matches(&self, tool: &str) -> bool {
        pattern_matches(&self.tool_pattern, tool)
    }
}

/// The user's answer to an approval prompt
#[derive(Debug, Clone, Copy)]
pub struct ApprovalResponse {
    pub approved: bool,
    /// Persist a rule even when scope is Once
    pub remember: bool,
    pub scope: ApprovalScope,
}

/// Outcome of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: String,
}

impl ApprovalDecision {
    fn approved(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
        }
    }
}

/// Wildcard-aware pattern match: exact name, or `server(*)` matching all
/// tools of that server
fn pattern_matches(pattern: &str, tool: &str) -> bool {
    if pattern == tool {
        return true;
    }
    if let Some(server) = pattern.strip_suffix("(*)") {
        return tool.strip_prefix(server).is_some_and(|rest| rest.starts_with('('));
    }
    false
}

/// Gates tool invocations behind rules and user prompts
pub struct ApprovalGate {
    session_rules: Mutex<Vec<ApprovalRule>>,
    global_rules: Mutex<Vec<ApprovalRule>>,
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalResponse>>>,
    /// Tools approved without asking (e.g. read-only tools)
    auto_approved: HashSet<String>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self {
            session_rules: Mutex::new(Vec::new()),
            global_rules: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            auto_approved: HashSet::new(),
        }
    }

    /// Auto-approve the given tools without prompting
    pub fn with_auto_approved(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.auto_approved = tools.into_iter().collect();
        self
    }

    /// Seed rules loaded from persistence
    pub fn load_rules(&self, rules: Vec<ApprovalRule>) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    pub fn add_rule(&self, rule: ApprovalRule) {
        debug!(pattern = %rule.tool_pattern, approved = rule.approved, scope = ?rule.scope, "ApprovalGate::add_rule");
        match rule.scope {
            ApprovalScope::Global => self.global_rules.lock().expect("gate lock").push(rule),
            _ => self.session_rules.lock().expect("gate lock").push(rule),
        }
    }

    /// All persisted rules, for saving through the persistence collaborator
    pub fn rules(&self) -> Vec<ApprovalRule> {
        let mut rules = self.session_rules.lock().expect("gate lock").clone();
        rules.extend(self.global_rules.lock().expect("gate lock").iter().cloned());
        rules
    }

    /// Resolve a pending prompt; returns false if the request is unknown
    pub fn resolve(&self, request_id: &str, response: ApprovalResponse) -> bool {
        match self.pending.lock().expect("gate lock").remove(request_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Dismiss a pending prompt without answering (dialog closed)
    pub fn dismiss(&self, request_id: &str) -> bool {
        self.pending.lock().expect("gate lock").remove(request_id).is_some()
    }

    /// Check whether `tool` may be invoked in `session_id`
    ///
    /// Rule precedence: session rules, then global rules, newest first
    /// within each. Unknown tools prompt the user and await the response.
    pub async fn check(
        &self,
        session_id: &str,
        tool: &str,
        args_summary: &str,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        if self.auto_approved.contains(tool) {
            return ApprovalDecision::approved("auto-approved tool");
        }

        if let Some(rule) = self.find_rule(session_id, tool) {
            return if rule.approved {
                ApprovalDecision::approved(format!("rule: {}", rule.tool_pattern))
            } else {
                ApprovalDecision::denied(format!("rule: {}", rule.tool_pattern))
            };
        }

        self.prompt_user(session_id, tool, args_summary, emitter, cancel).await
    }

    fn find_rule(&self, session_id: &str, tool: &str) -> Option<ApprovalRule> {
        let session_rules = self.session_rules.lock().expect("gate lock");
        if let Some(rule) = session_rules
            .iter()
            .rev()
            .find(|r| r.session_id.as_deref() == Some(session_id) && r.matches(tool))
        {
            return Some(rule.clone());
        }
        drop(session_rules);

        let global_rules = self.global_rules.lock().expect("gate lock");
        global_rules.iter().rev().find(|r| r.matches(tool)).cloned()
    }

    async fn prompt_user(
        &self,
        session_id: &str,
        tool: &str,
        args_summary: &str,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let request_id = generate_id("approval", tool);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("gate lock").insert(request_id.clone(), tx);

        emitter.emit(EventKind::ApprovalRequested {
            request_id: request_id.clone(),
            tool: tool.to_string(),
            args_summary: args_summary.to_string(),
        });

        let decision = tokio::select! {
            _ = cancel.cancelled() => {
                self.pending.lock().expect("gate lock").remove(&request_id);
                ApprovalDecision::denied("Cancelled")
            }
            response = rx => match response {
                Ok(response) => {
                    self.remember(session_id, tool, response);
                    if response.approved {
                        ApprovalDecision::approved("user approved")
                    } else {
                        ApprovalDecision::denied("user denied")
                    }
                }
                // Sender dropped: the dialog closed without an answer
                Err(_) => {
                    warn!(%tool, "approval prompt dismissed, failing closed");
                    ApprovalDecision::denied("Dialog closed")
                }
            }
        };

        emitter.emit(EventKind::ApprovalResolved {
            request_id,
            approved: decision.approved,
            reason: decision.reason.clone(),
        });
        decision
    }

    fn remember(&self, session_id: &str, tool: &str, response: ApprovalResponse) {
        let scope = match (response.scope, response.remember) {
            (ApprovalScope::Once, true) => ApprovalScope::Session,
            (scope, _) => scope,
        };
        if scope == ApprovalScope::Once {
            return;
        }
        self.add_rule(ApprovalRule {
            tool_pattern: tool.to_string(),
            approved: response.approved,
            scope,
            session_id: (scope == ApprovalScope::Session).then(|| session_id.to_string()),
            created_at: Utc::now(),
        });
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::EventBus;

    fn rule(pattern: &str, approved: bool, scope: ApprovalScope, session: Option<&str>) -> ApprovalRule {
        ApprovalRule {
            tool_pattern: pattern.to_string(),
            approved,
            scope,
            session_id: session.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("fs.read", "fs.read"));
        assert!(!pattern_matches("fs.read", "fs.write"));
        assert!(pattern_matches("github(*)", "github(list_issues)"));
        assert!(pattern_matches("github(*)", "github(create_pr)"));
        assert!(!pattern_matches("github(*)", "gitlab(list_issues)"));
        assert!(!pattern_matches("github(*)", "github"));
    }

    #[tokio::test]
    async fn test_session_rule_wins() {
        let gate = ApprovalGate::new();
        gate.add_rule(rule("fs.write", false, ApprovalScope::Global, None));
        gate.add_rule(rule("fs.write", true, ApprovalScope::Session, Some("s1")));

        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("s1");
        let cancel = CancellationToken::new();

        let decision = gate.check("s1", "fs.write", "{}", &emitter, &cancel).await;
        assert!(decision.approved);

        // Different session falls through to the global denial
        let decision = gate.check("s2", "fs.write", "{}", &emitter, &cancel).await;
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn test_auto_approved_skips_prompt() {
        let gate = ApprovalGate::new().with_auto_approved(vec!["fs.read".to_string()]);
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("s1");

        let decision = gate
            .check("s1", "fs.read", "{}", &emitter, &CancellationToken::new())
            .await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_prompt_approve_and_remember() {
        let gate = Arc::new(ApprovalGate::new());
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("s1");
        let cancel = CancellationToken::new();

        let gate2 = gate.clone();
        let responder = tokio::spawn(async move {
            // Wait for the ApprovalRequested event, then resolve it
            loop {
                let event = rx.recv().await.unwrap();
                if let EventKind::ApprovalRequested { request_id, .. } = event.kind {
                    gate2.resolve(
                        &request_id,
                        ApprovalResponse {
                            approved: true,
                            remember: true,
                            scope: ApprovalScope::Once,
                        },
                    );
                    break;
                }
            }
        });

        let decision = gate.check("s1", "web.fetch", "{}", &emitter, &cancel).await;
        responder.await.unwrap();
        assert!(decision.approved);

        // remember=true with scope Once persists a session rule
        let decision = gate.check("s1", "web.fetch", "{}", &emitter, &cancel).await;
        assert!(decision.approved);
        assert!(decision.reason.starts_with("rule:"));
    }

    #[tokio::test]
    async fn test_dismissed_prompt_fails_closed() {
        let gate = Arc::new(ApprovalGate::new());
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("s1");

        let gate2 = gate.clone();
        tokio::spawn(async move {
            loop {
                let event = rx.recv().await.unwrap();
                if let EventKind::ApprovalRequested { request_id, .. } = event.kind {
                    gate2.dismiss(&request_id);
                    break;
                }
            }
        });

        let decision = gate
            .check("s1", "shell.exec", "{}", &emitter, &CancellationToken::new())
            .await;
        assert!(!decision.approved);
        assert_eq!(decision.reason, "Dialog closed");
    }

    #[tokio::test]
    async fn test_cancellation_denies() {
        let gate = ApprovalGate::new();
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("s1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let decision = gate.check("s1", "shell.exec", "{}", &emitter, &cancel).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason, "Cancelled");
    }

    #[tokio::test]
    async fn test_wildcard_rule_covers_server() {
        let gate = ApprovalGate::new();
        gate.add_rule(rule("mcp-git(*)", true, ApprovalScope::Global, None));

        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("s1");
        let decision = gate
            .check("s1", "mcp-git(status)", "{}", &emitter, &CancellationToken::new())
            .await;
        assert!(decision.approved);
    }

    #[test]
    fn test_resolve_unknown_request() {
        let gate = ApprovalGate::new();
        assert!(!gate.resolve(
            "nope",
            ApprovalResponse {
                approved: true,
                remember: false,
                scope: ApprovalScope::Once,
            }
        ));
    }
}
