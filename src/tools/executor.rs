//! Sandboxed tool executor
//!
//! Wraps every tool invocation with: a timeout, the per-tool circuit
//! breaker, output truncation, and the retry policy. All outcomes come
//! back as a [`ToolCallRecord`]; the executor never errors to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ToolError;
use super::provider::ToolProvider;
use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot};
use crate::domain::ToolCallRecord;
use crate::llm::ToolDefinition;
use crate::retry::{RetryError, RetryPolicy};

/// Sentinel appended when output exceeds the cap
const TRUNCATION_SENTINEL: &str = "\n[output truncated at 50 KiB]";

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-call timeout
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Output cap in bytes
    #[serde(rename = "output-cap-bytes")]
    pub output_cap_bytes: usize,

    pub retry: RetryPolicy,

    pub breaker: BreakerConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3 * 60 * 1000,
            output_cap_bytes: 50 * 1024,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Executes tool calls against the provider with full sandboxing
pub struct SandboxedExecutor {
    provider: Arc<dyn ToolProvider>,
    config: ExecutorConfig,
    breakers: BreakerRegistry,
}

impl SandboxedExecutor {
    pub fn new(provider: Arc<dyn ToolProvider>, config: ExecutorConfig) -> Self {
        let breakers = BreakerRegistry::new(config.breaker.clone());
        Self {
            provider,
            config,
            breakers,
        }
    }

    /// Tool definitions for offering to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.provider.list_tools().iter().map(|d| d.to_definition()).collect()
    }

    /// Definitions restricted to a preferred subset; empty subset = all
    pub fn definitions_for(&self, tool_names: &[String]) -> Vec<ToolDefinition> {
        if tool_names.is_empty() {
            return self.definitions();
        }
        self.provider
            .list_tools()
            .iter()
            .filter(|d| tool_names.iter().any(|n| n == &d.name))
            .map(|d| d.to_definition())
            .collect()
    }

    /// Current breaker state for every tool seen so far
    pub fn breaker_snapshots(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Names of tools the provider declares read-only
    pub fn read_only_tools(&self) -> Vec<String> {
        self.provider
            .list_tools()
            .into_iter()
            .filter(|d| d.read_only)
            .map(|d| d.name)
            .collect()
    }

    /// Execute one tool call
    ///
    /// Cancellation short-circuits retries and reports as a cancelled
    /// record. A breaker rejection reports the retry-after without
    /// touching the underlying tool.
    pub async fn execute(&self, name: &str, input: serde_json::Value, cancel: &CancellationToken) -> ToolCallRecord {
        let started = Instant::now();
        let breaker = self.breakers.breaker(name);
        let timeout = self.config.timeout();

        let outcome = self
            .config
            .retry
            .execute(cancel, ToolError::is_retryable, |attempt| {
                let breaker = breaker.clone();
                let input = input.clone();
                let provider = self.provider.clone();
                let name = name.to_string();
                let child_cancel = cancel.child_token();
                async move {
                    breaker.try_acquire().map_err(|retry_after| {
                        warn!(tool = %name, ?retry_after, "tool call rejected by open circuit");
                        ToolError::CircuitOpen { retry_after }
                    })?;

                    debug!(tool = %name, attempt, "invoking tool");
                    let result = tokio::select! {
                        _ = child_cancel.cancelled() => Err(ToolError::Cancelled),
                        invoked = tokio::time::timeout(timeout, provider.invoke(&name, &input, &child_cancel)) => {
                            match invoked {
                                Ok(inner) => inner,
                                Err(_) => Err(ToolError::Timeout(timeout)),
                            }
                        }
                    };

                    match &result {
                        Ok(_) => breaker.record_success(),
                        Err(e) if e.is_cancelled() || matches!(e, ToolError::CircuitOpen { .. }) => {}
                        Err(_) => breaker.record_failure(),
                    }
                    result
                }
            })
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                let output = truncate_output(output, self.config.output_cap_bytes);
                ToolCallRecord::succeeded(name, input, output, duration_ms)
            }
            Err(RetryError::Cancelled) => ToolCallRecord::failed(name, input, "cancelled", duration_ms),
            Err(RetryError::Exhausted { error, .. }) => match error {
                ToolError::Cancelled => ToolCallRecord::failed(name, input, "cancelled", duration_ms),
                other => ToolCallRecord::failed(name, input, other.to_string(), duration_ms),
            },
        }
    }
}

/// Truncate output to the cap on a char boundary, appending the sentinel
fn truncate_output(output: String, cap: usize) -> String {
    if output.len() <= cap {
        return output;
    }
    let mut cut = cap;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = output[..cut].to_string();
    truncated.push_str(TRUNCATION_SENTINEL);
    truncated
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::tools::ToolDescriptor;

    /// Provider that fails a configured number of times before succeeding
    struct FlakyProvider {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolProvider for FlakyProvider {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "fs.read".into(),
                description: "Read a file".into(),
                parameter_schema: serde_json::json!({"type": "object"}),
                read_only: true,
            }]
        }

        async fn invoke(
            &self,
            _name: &str,
            _args: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(ToolError::Transient(format!("failure {}", n)))
            } else {
                Ok("contents".to_string())
            }
        }
    }

    /// Provider that always fails permanently
    struct BrokenProvider;

    #[async_trait]
    impl ToolProvider for BrokenProvider {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![]
        }

        async fn invoke(
            &self,
            _name: &str,
            _args: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String, ToolError> {
            Err(ToolError::Failed("disk on fire".into()))
        }
    }

    fn fast_config() -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        config.retry = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(0.0);
        config
    }

    #[tokio::test]
    async fn test_successful_call() {
        let executor = SandboxedExecutor::new(Arc::new(FlakyProvider::new(0)), fast_config());
        let record = executor
            .execute("fs.read", serde_json::json!({"path": "/a"}), &CancellationToken::new())
            .await;
        assert!(record.success);
        assert_eq!(record.output, "contents");
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let provider = Arc::new(FlakyProvider::new(2));
        let executor = SandboxedExecutor::new(provider.clone(), fast_config());
        let record = executor
            .execute("fs.read", serde_json::json!({}), &CancellationToken::new())
            .await;
        assert!(record.success);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let executor = SandboxedExecutor::new(Arc::new(BrokenProvider), fast_config());
        let record = executor
            .execute("fs.write", serde_json::json!({}), &CancellationToken::new())
            .await;
        assert!(!record.success);
        assert!(record.output.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_breaker_trips_and_rejects_without_invoking() {
        // Threshold 3, no retries so each execute is one underlying call
        let mut config = fast_config();
        config.retry = RetryPolicy::no_retry();
        let provider = Arc::new(FlakyProvider::new(u32::MAX));
        let executor = SandboxedExecutor::new(provider.clone(), config);
        let cancel = CancellationToken::new();

        // Transient errors still count as failures toward the breaker
        for _ in 0..3 {
            let record = executor.execute("fs.read", serde_json::json!({}), &cancel).await;
            assert!(!record.success);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        // Fourth call: rejected by the open circuit, provider untouched
        let record = executor.execute("fs.read", serde_json::json!({}), &cancel).await;
        assert!(!record.success);
        assert!(record.output.contains("unavailable"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_reports_cancelled() {
        let executor = SandboxedExecutor::new(Arc::new(BrokenProvider), fast_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let record = executor.execute("fs.read", serde_json::json!({}), &cancel).await;
        assert!(!record.success);
        assert_eq!(record.output, "cancelled");
    }

    #[tokio::test]
    async fn test_definitions_subset() {
        let executor = SandboxedExecutor::new(Arc::new(FlakyProvider::new(0)), fast_config());
        assert_eq!(executor.definitions().len(), 1);
        assert_eq!(executor.definitions_for(&["fs.read".to_string()]).len(), 1);
        assert!(executor.definitions_for(&["nope".to_string()]).is_empty());
    }

    #[test]
    fn test_truncate_output() {
        let short = truncate_output("hello".into(), 50 * 1024);
        assert_eq!(short, "hello");

        let long = truncate_output("x".repeat(60 * 1024), 50 * 1024);
        assert!(long.len() < 60 * 1024);
        assert!(long.ends_with(TRUNCATION_SENTINEL));
        assert!(long.starts_with("xxx"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // Multi-byte char straddling the cap must not split
        let s = format!("{}é", "a".repeat(50 * 1024 - 1));
        let truncated = truncate_output(s, 50 * 1024);
        assert!(truncated.ends_with(TRUNCATION_SENTINEL));
    }
}
