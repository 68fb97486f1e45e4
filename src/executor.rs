// ADSMITH Parallel Executor - Bounded Fan-Out & Poll Groups
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// All stage concurrency flows through this module; nothing else spawns
// tasks. Two modes: fan-out map (submit N, join all, input order) and
// submit-all-then-poll for asynchronous providers.

use crate::error::{PipelineError, ProviderError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Default worker count for image/audio fan-out and motion submissions.
pub const DEFAULT_WORKERS: usize = 3;

/// Cooperative cancellation flag shared across a stage run.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-task progress callback, fired on completion in whatever order tasks
/// finish.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Boxed task shape for heterogeneous fan-outs (mixed closure types in one
/// submission batch).
pub type BoxedTaskFuture<T> = std::pin::Pin<Box<dyn Future<Output = Result<T>> + Send>>;
pub type BoxedTask<T> = Box<dyn FnOnce() -> BoxedTaskFuture<T> + Send>;

pub struct ParallelExecutor {
    workers: usize,
}

impl ParallelExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Default pool: 3 workers, never more than the machine has cores.
    pub fn default_pool() -> Self {
        Self::new(DEFAULT_WORKERS.min(num_cpus::get().max(1)))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fan-out map: run every task through the bounded pool and return the
    /// per-slot results in input order. Tasks not yet started when the token
    /// fires are abandoned with `Cancelled`; in-flight tasks run to
    /// completion and their results are kept.
    pub async fn fan_out<T, F, Fut>(
        &self,
        tasks: Vec<F>,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(tasks.len());

        for (slot, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                // Permit acquisition is the submission point: a cancelled
                // group stops here, before any provider work begins.
                let _permit = semaphore.acquire_owned().await.expect("pool closed");
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let started = Instant::now();
                let result = task().await;
                if let Some(cb) = progress {
                    let verdict = if result.is_ok() { "ok" } else { "error" };
                    cb(&format!(
                        "slot {} {} in {}ms",
                        slot,
                        verdict,
                        started.elapsed().as_millis()
                    ));
                }
                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(res) => res,
                Err(join_err) => Err(PipelineError::StageFailed {
                    stage: "executor".into(),
                    detail: format!("worker panicked: {}", join_err),
                }),
            });
        }
        results
    }
}

/// Exponential poll backoff: 2s initial, x1.5 per step, 30s cap.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    current: Duration,
}

impl PollBackoff {
    pub fn new() -> Self {
        Self {
            current: Duration::from_secs(2),
        }
    }

    /// The delay to sleep before the next poll; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let bumped = self.current.as_secs_f64() * 1.5;
        self.current = Duration::from_secs_f64(bumped.min(30.0));
        delay
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal-or-not outcome of one poll call.
pub enum Polled<T> {
    Pending,
    Ready(T),
    Failed(String),
}

/// Submit-all-then-poll driver. Every slot is polled with its own backoff
/// schedule until terminal, the group deadline expires, or the token fires.
/// Results are returned in input order; completed slots survive
/// cancellation.
pub async fn poll_all<T, F, Fut>(
    slots: Vec<F>,
    cancel: &CancelToken,
    per_slot_deadline: Duration,
) -> Vec<Result<T>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<Polled<T>, ProviderError>>,
{
    struct SlotState {
        backoff: PollBackoff,
        next_poll_at: Instant,
        deadline: Instant,
    }

    let started = Instant::now();
    let mut states: Vec<SlotState> = slots
        .iter()
        .map(|_| SlotState {
            backoff: PollBackoff::new(),
            next_poll_at: started,
            deadline: started + per_slot_deadline,
        })
        .collect();
    let mut results: Vec<Option<Result<T>>> = slots.iter().map(|_| None).collect();

    loop {
        let pending: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_none())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            break;
        }
        if cancel.is_cancelled() {
            for i in pending {
                results[i] = Some(Err(PipelineError::Cancelled));
            }
            break;
        }

        // Sleep until the earliest slot is due.
        let now = Instant::now();
        if let Some(earliest) = pending.iter().map(|&i| states[i].next_poll_at).min() {
            if earliest > now {
                tokio::time::sleep(earliest - now).await;
            }
        }

        for i in pending {
            let now = Instant::now();
            if states[i].next_poll_at > now {
                continue;
            }
            if now > states[i].deadline {
                warn!("[EXEC] Poll slot {} exceeded deadline, marking failed", i);
                results[i] = Some(Err(PipelineError::Provider(ProviderError::new(
                    "poll-group",
                    crate::error::ErrorKind::Retryable,
                    "poll deadline exceeded",
                ))));
                continue;
            }

            match slots[i]().await {
                Ok(Polled::Ready(value)) => {
                    info!("[EXEC] Poll slot {} terminal: ready", i);
                    results[i] = Some(Ok(value));
                }
                Ok(Polled::Failed(reason)) => {
                    info!("[EXEC] Poll slot {} terminal: failed ({})", i, reason);
                    results[i] = Some(Err(PipelineError::Provider(ProviderError::new(
                        "poll-group",
                        crate::error::ErrorKind::Permanent,
                        reason,
                    ))));
                }
                Ok(Polled::Pending) => {
                    let delay = states[i].backoff.next_delay();
                    states[i].next_poll_at = Instant::now() + delay;
                }
                Err(e) if e.retryable() => {
                    let delay = states[i].backoff.next_delay();
                    states[i].next_poll_at = Instant::now() + delay;
                }
                Err(e) => {
                    results[i] = Some(Err(PipelineError::Provider(e)));
                }
            }
        }
    }

    results.into_iter().map(|r| r.expect("slot resolved")).collect()
}
