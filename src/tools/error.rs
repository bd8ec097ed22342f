//! Tool execution errors

use std::time::Duration;

use thiserror::Error;

/// Errors from tool invocation and its sandbox wrapper
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient backend failure worth retrying
    #[error("transient tool failure: {0}")]
    Transient(String),

    /// Permanent backend failure
    #[error("tool failed: {0}")]
    Failed(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool call cancelled")]
    Cancelled,

    #[error("tool unavailable (circuit open, retry after {retry_after:?})")]
    CircuitOpen { retry_after: Duration },

    #[error("tool denied: {reason}")]
    Denied { reason: String },
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ToolError::Transient("503".into()).is_retryable());
        assert!(!ToolError::Failed("bad state".into()).is_retryable());
        assert!(!ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ToolError::Cancelled.is_retryable());
        assert!(
            !ToolError::CircuitOpen {
                retry_after: Duration::from_secs(30)
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_circuit_open_message() {
        let err = ToolError::CircuitOpen {
            retry_after: Duration::from_secs(12),
        };
        assert!(err.to_string().contains("unavailable"));
        assert!(err.to_string().contains("12"));
    }
}
