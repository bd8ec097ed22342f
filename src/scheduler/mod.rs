//! DAG scheduler - topological layering and parallel stage execution
//!
//! Layering repeatedly extracts the chunks whose dependencies are already
//! placed; each extraction forms one stage. Stage execution runs chunks
//! concurrently under a semaphore, retries failed chunks with the error
//! context injected into the next prompt, and aborts the run once total
//! failures reach the configured threshold.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ChunkResult, ChunkStatus, OrchestrationPlan, WorkChunk};
use crate::events::EventEmitter;

/// Scheduler failures are session-fatal
#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("cyclic dependency among chunks: {remaining:?}")]
    CyclicDependency { remaining: Vec<String> },

    #[error("chunk {chunk} depends on unknown chunk {dependency}")]
    UnknownDependency { chunk: String, dependency: String },
}

/// Layer a plan into stages
///
/// Every chunk's dependencies land in an earlier stage. A pass that
/// places nothing while chunks remain means a cycle.
pub fn build_stages(plan: &OrchestrationPlan) -> Result<Vec<Vec<String>>, SchedulerError> {
    for chunk in &plan.chunks {
        for dep in &chunk.depends_on {
            if plan.chunk(dep).is_none() {
                return Err(SchedulerError::UnknownDependency {
                    chunk: chunk.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut placed: HashSet<String> = HashSet::new();
    let mut remaining: Vec<&WorkChunk> = plan.chunks.iter().collect();
    let mut stages = Vec::new();

    while !remaining.is_empty() {
        let (ready, rest): (Vec<&WorkChunk>, Vec<&WorkChunk>) = remaining
            .into_iter()
            .partition(|c| c.depends_on.iter().all(|d| placed.contains(d)));

        if ready.is_empty() {
            return Err(SchedulerError::CyclicDependency {
                remaining: rest.iter().map(|c| c.id.clone()).collect(),
            });
        }

        let mut stage: Vec<&WorkChunk> = ready;
        stage.sort_by_key(|c| (c.sequence_index, c.id.clone()));
        placed.extend(stage.iter().map(|c| c.id.clone()));
        stages.push(stage.into_iter().map(|c| c.id.clone()).collect());
        remaining = rest;
    }

    Ok(stages)
}

/// How a single chunk attempt failed
#[derive(Debug, Clone)]
pub enum ChunkFailure {
    /// Worker reported an error; retryable
    Error(String),
    /// Wall-clock timeout elapsed; retryable
    TimedOut,
    /// Cancellation; never retried, never counted as a failure
    Cancelled,
}

/// Executes one chunk attempt; implemented by the Team driver and by tests
#[async_trait]
pub trait ChunkWorker: Send + Sync {
    async fn run_chunk(
        &self,
        chunk: &WorkChunk,
        attempt: u32,
        prior_error: Option<String>,
        injected: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<String, ChunkFailure>;
}

/// Stage execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRunnerConfig {
    #[serde(rename = "max-parallel")]
    pub max_parallel: usize,

    #[serde(rename = "max-retries-per-chunk")]
    pub max_retries_per_chunk: u32,

    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Failed chunks that abort the remaining stages
    #[serde(rename = "abort-failure-threshold")]
    pub abort_failure_threshold: u32,

    /// Per-chunk wall-clock timeout
    #[serde(rename = "worker-timeout-ms")]
    pub worker_timeout_ms: u64,
}

impl Default for StageRunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            max_retries_per_chunk: 2,
            retry_delay_ms: 5_000,
            abort_failure_threshold: 3,
            worker_timeout_ms: 10 * 60 * 1000,
        }
    }
}

/// Outcome of executing a whole plan
#[derive(Debug)]
pub struct ExecutionSummary {
    /// One result per chunk, in plan order
    pub results: Vec<ChunkResult>,
    /// The abort threshold was reached and later stages were skipped
    pub aborted: bool,
}

impl ExecutionSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status == ChunkStatus::Completed).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, ChunkStatus::Failed | ChunkStatus::TimedOut))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.results.iter().filter(|r| r.status == ChunkStatus::Cancelled).count()
    }
}

/// Drives a plan's stages against a [`ChunkWorker`]
pub struct StageRunner {
    config: StageRunnerConfig,
    emitter: EventEmitter,
    injections: Arc<std::sync::Mutex<Vec<String>>>,
}

impl StageRunner {
    pub fn new(config: StageRunnerConfig, emitter: EventEmitter) -> Self {
        Self {
            config,
            emitter,
            injections: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Queue an instruction; remaining chunks see it from the next stage
    /// boundary onwards
    pub fn inject(&self, instruction: String) {
        self.injections.lock().expect("injection lock").push(instruction);
    }

    /// Execute every stage of the plan
    pub async fn run(
        &self,
        plan: &OrchestrationPlan,
        worker: Arc<dyn ChunkWorker>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary, SchedulerError> {
        let stages = build_stages(plan)?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let failures = Arc::new(AtomicU32::new(0));
        let mut results: HashMap<String, ChunkResult> = HashMap::new();
        let mut aborted = false;

        for (stage_index, stage) in stages.iter().enumerate() {
            if aborted || cancel.is_cancelled() {
                for chunk_id in stage {
                    results.insert(chunk_id.clone(), ChunkResult {
                        chunk_id: chunk_id.clone(),
                        status: ChunkStatus::Cancelled,
                        output: if aborted { "aborted".into() } else { "cancelled".into() },
                        retries: 0,
                        duration_ms: 0,
                        workspace: None,
                    });
                }
                continue;
            }

            // Instructions injected during earlier stages apply from here on
            let injected = self.injections.lock().expect("injection lock").clone();

            self.emitter.stage_started(stage_index, stage.clone());
            info!(stage_index, chunks = stage.len(), "stage started");

            let mut join_set = JoinSet::new();
            for chunk_id in stage {
                let chunk = plan.chunk(chunk_id).expect("staged chunk exists").clone();
                let worker = worker.clone();
                let semaphore = semaphore.clone();
                let emitter = self.emitter.clone();
                let config = self.config.clone();
                let failures = failures.clone();
                let injected = injected.clone();
                let cancel = cancel.child_token();

                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    run_one_chunk(chunk, worker, emitter, config, failures, injected, cancel).await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => {
                        results.insert(result.chunk_id.clone(), result);
                    }
                    Err(e) => warn!(error = %e, "chunk task panicked"),
                }
            }

            self.emitter.stage_completed(stage_index);

            if failures.load(Ordering::SeqCst) >= self.config.abort_failure_threshold {
                warn!(
                    threshold = self.config.abort_failure_threshold,
                    "abort threshold reached, skipping remaining stages"
                );
                aborted = true;
            }
        }

        // Plan order, not completion order
        let ordered = plan
            .chunks
            .iter()
            .filter_map(|c| results.remove(&c.id))
            .collect();

        Ok(ExecutionSummary {
            results: ordered,
            aborted,
        })
    }
}

/// Run one chunk to completion, with retries and the wall-clock timeout
async fn run_one_chunk(
    chunk: WorkChunk,
    worker: Arc<dyn ChunkWorker>,
    emitter: EventEmitter,
    config: StageRunnerConfig,
    failures: Arc<AtomicU32>,
    injected: Vec<String>,
    cancel: CancellationToken,
) -> ChunkResult {
    let started = std::time::Instant::now();
    emitter.worker_started(&chunk.id, chunk.assigned_role.name());

    let timeout = Duration::from_millis(config.worker_timeout_ms);
    let mut prior_error: Option<String> = None;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return finish(chunk.id, ChunkStatus::Cancelled, "cancelled".into(), attempt, started);
        }

        let attempt_cancel = cancel.child_token();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChunkFailure::Cancelled),
            run = tokio::time::timeout(
                timeout,
                worker.run_chunk(&chunk, attempt, prior_error.clone(), injected.clone(), attempt_cancel.clone()),
            ) => match run {
                Ok(inner) => inner,
                Err(_) => {
                    attempt_cancel.cancel();
                    Err(ChunkFailure::TimedOut)
                }
            },
        };

        match outcome {
            Ok(output) => {
                emitter.worker_completed(&chunk.id, &output);
                return finish(chunk.id, ChunkStatus::Completed, output, attempt, started);
            }
            Err(ChunkFailure::Cancelled) => {
                return finish(chunk.id, ChunkStatus::Cancelled, "cancelled".into(), attempt, started);
            }
            Err(failure) => {
                let (error_text, timed_out) = match &failure {
                    ChunkFailure::TimedOut => (format!("timed out after {:?}", timeout), true),
                    ChunkFailure::Error(e) => (e.clone(), false),
                    ChunkFailure::Cancelled => unreachable!(),
                };

                if attempt < config.max_retries_per_chunk {
                    attempt += 1;
                    emitter.worker_retrying(&chunk.id, attempt, &error_text);
                    debug!(chunk = %chunk.id, attempt, "retrying chunk");
                    prior_error = Some(error_text);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return finish(chunk.id, ChunkStatus::Cancelled, "cancelled".into(), attempt, started);
                        }
                        _ = tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)) => {}
                    }
                } else {
                    emitter.worker_failed(&chunk.id, &error_text);
                    failures.fetch_add(1, Ordering::SeqCst);
                    let status = if timed_out { ChunkStatus::TimedOut } else { ChunkStatus::Failed };
                    return finish(chunk.id, status, error_text, attempt, started);
                }
            }
        }
    }
}

fn finish(
    chunk_id: String,
    status: ChunkStatus,
    output: String,
    retries: u32,
    started: std::time::Instant,
) -> ChunkResult {
    ChunkResult {
        chunk_id,
        status,
        output,
        retries,
        duration_ms: started.elapsed().as_millis() as u64,
        workspace: None,
    }
}
