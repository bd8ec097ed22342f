//! LLM client abstraction
//!
//! The core consumes a provider-agnostic [`LlmClient`] trait; the actual
//! transport (subprocess, socket, in-process library) is a collaborator.

pub mod client;
mod error;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, MessageRole, StopReason,
    StreamChunk, TokenUsage, ToolCall, ToolDefinition,
};
