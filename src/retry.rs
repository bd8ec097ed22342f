//! Retry with exponential backoff and jitter
//!
//! `delay(attempt) = min(base * 2^attempt, max)` with uniform jitter of
//! `±jitter * delay`. Cancellation is never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff configuration for retried operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Jitter factor in [0, 1]; 0.25 means ±25%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.25,
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The caller's cancellation token fired
    Cancelled,
    /// Retries exhausted or the predicate declined; carries the last error
    Exhausted { attempts: u32, error: E },
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Capped exponential delay before jitter, for attempt number `attempt` (0-based)
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(20);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered delay for attempt number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt).as_secs_f64();
        if self.jitter <= f64::EPSILON {
            return Duration::from_secs_f64(raw);
        }
        let offset: f64 = rand::rng().random_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((raw * (1.0 + offset)).max(0.0))
    }

    /// Run `op`, retrying while attempts remain and `should_retry` accepts
    /// the error. The attempt index (0-based) is passed to `op`. The token
    /// is honoured both between attempts and during the backoff sleep.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        should_retry: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !should_retry(&error) {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            error,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "RetryPolicy::execute: backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_raw_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.raw_delay(0), Duration::from_secs(1));
        assert_eq!(policy.raw_delay(1), Duration::from_secs(2));
        assert_eq!(policy.raw_delay(2), Duration::from_secs(4));
        assert_eq!(policy.raw_delay(10), Duration::from_secs(60));
        assert_eq!(policy.raw_delay(63), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn prop_jittered_delay_within_bounds(attempt in 0u32..16, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy::default().with_jitter(jitter);
            let raw = policy.raw_delay(attempt).as_secs_f64();
            let delay = policy.delay_for_attempt(attempt).as_secs_f64();
            let lo = (raw * (1.0 - jitter)).max(0.0) - 1e-6;
            let hi = raw * (1.0 + jitter) + 1e-6;
            prop_assert!(delay >= lo && delay <= hi, "delay {} outside [{}, {}]", delay, lo, hi);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_until_success() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<u32, RetryError<&str>> = policy
            .execute(&cancel, |_| true, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok(n) } }
            })
            .await;

        assert!(matches!(result, Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts() {
        let policy = RetryPolicy::default().with_max_retries(2).with_jitter(0.0);
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<&str>> =
            policy.execute(&cancel, |_| true, |_| async { Err("always") }).await;

        match result {
            Err(RetryError::Exhausted { attempts, error }) => {
                assert_eq!(attempts, 3);
                assert_eq!(error, "always");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_predicate_stops_retries() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<&str>> = policy
            .execute(&cancel, |e| *e != "fatal", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_never_retried() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = policy
            .execute(&cancel, |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("x") }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            child.cancel();
        });

        let result: Result<(), RetryError<&str>> =
            policy.execute(&cancel, |_| true, |_| async { Err("transient") }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
