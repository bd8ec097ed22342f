//! Session messages and tool-call records
//!
//! Messages are immutable once appended to a session. Tool-call records
//! are produced by the sandboxed executor and attached to the message
//! that requested them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRole {
    /// The human user
    User,
    /// The coordinating agent (Head / Manager / Orchestrator)
    Head,
    /// A worker-class agent (Panelist / Worker / Assistant)
    Worker,
    /// The system itself
    System,
}

/// What kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    Clarification,
    Plan,
    Argument,
    ToolResult,
    Commentary,
    Synthesis,
    Error,
}

/// Record of a single tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name as requested by the model
    pub tool: String,
    /// Input arguments
    pub input: serde_json::Value,
    /// Output text, or error text when `success` is false
    pub output: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn succeeded(tool: impl Into<String>, input: serde_json::Value, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.into(),
            input,
            output: output.into(),
            success: true,
            duration_ms,
        }
    }

    pub fn failed(tool: impl Into<String>, input: serde_json::Value, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.into(),
            input,
            output: error.into(),
            success: false,
            duration_ms,
        }
    }
}

/// A message appended to a session's conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    /// Agent that authored the message; None for user/system messages
    pub agent_id: Option<String>,
    pub author: AuthorRole,
    pub kind: MessageType,
    pub content: String,
    /// Message this one replies to, if any
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: Option<String>,
        author: AuthorRole,
        kind: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id("msg", "m"),
            session_id: session_id.into(),
            agent_id,
            author,
            kind,
            content: content.into(),
            reply_to: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, None, AuthorRole::User, MessageType::UserMessage, content)
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message() {
        let msg = SessionMessage::user("s1", "hello");
        assert_eq!(msg.author, AuthorRole::User);
        assert_eq!(msg.kind, MessageType::UserMessage);
        assert!(msg.agent_id.is_none());
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_call_record_outcomes() {
        let ok = ToolCallRecord::succeeded("fs.read", serde_json::json!({"path": "/a"}), "contents", 12);
        assert!(ok.success);
        let err = ToolCallRecord::failed("fs.read", serde_json::json!({}), "denied", 1);
        assert!(!err.success);
        assert_eq!(err.output, "denied");
    }

    #[test]
    fn test_message_serde_skips_empty_tool_calls() {
        let msg = SessionMessage::user("s1", "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_reply_threading() {
        let first = SessionMessage::user("s1", "question");
        let reply = SessionMessage::new("s1", Some("a1".into()), AuthorRole::Head, MessageType::Clarification, "answer")
            .with_reply_to(first.id.clone());
        assert_eq!(reply.reply_to.as_deref(), Some(first.id.as_str()));
    }
}
