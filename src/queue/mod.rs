//! Rate-limited, priority-ordered task queue.
//!
//! At most one task runs at a time. Higher priorities run first and equal
//! priorities run in enqueue order. Each task is preceded by a delay computed
//! from [`PacingPolicy`]: exponential backoff over the queue-wide count of
//! consecutive failures, raised to honour the requests-per-minute budget, then
//! jittered. The queue never retries. A failed task's error goes back to its
//! own caller and the next task is dequeued.
//!
//! The processing loop is spawned on the first enqueue into an idle queue and
//! exits when the queue drains; the `processing` flag guarantees there is never
//! more than one loop.

mod pacing;

pub use pacing::PacingPolicy;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::metrics;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct PendingTask {
    priority: i32,
    seq: u64,
    enqueued_at: Instant,
    job: Job,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    // Max-heap: higher priority first, then the earlier enqueue.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingTask>,
    next_seq: u64,
    processing: bool,
    consecutive_failures: u32,
    last_execution_at: Option<Instant>,
}

/// Non-blocking snapshot of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub consecutive_failures: u32,
    pub is_rate_limited: bool,
}

struct Inner {
    policy: PacingPolicy,
    state: Mutex<QueueState>,
}

/// Cheaply cloneable handle to the process-wide queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.inner.policy
    }

    /// Queue `task` and return a future resolving to its outcome.
    ///
    /// The task is inserted immediately, before the returned future is first
    /// polled, so call order defines FIFO order among equal priorities.
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<T, F, Fut>(
        &self,
        task: F,
        priority: i32,
    ) -> impl Future<Output = anyhow::Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = task().await;
                let outcome = result.as_ref().map(|_| ()).map_err(|e| format!("{e:#}"));
                let _ = tx.send(result);
                outcome
            })
        });

        let start_loop = {
            let mut state = self.inner.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(PendingTask {
                priority,
                seq,
                enqueued_at: Instant::now(),
                job,
            });
            !std::mem::replace(&mut state.processing, true)
        };

        if start_loop {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.process());
        }

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "task was dropped by the queue before it completed"
                )),
            }
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock_state();
        let now = Instant::now();
        QueueStatus {
            queue_length: state.pending.len(),
            is_processing: state.processing,
            consecutive_failures: state.consecutive_failures,
            is_rate_limited: state.last_execution_at.is_some_and(|last| {
                now.saturating_duration_since(last) < self.inner.policy.spacing()
            }),
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn process(self: Arc<Self>) {
        loop {
            let (task, delay, failures) = {
                let mut state = self.lock_state();
                let Some(task) = state.pending.pop() else {
                    state.processing = false;
                    return;
                };
                let delay = self.policy.next_delay(
                    state.consecutive_failures,
                    state.last_execution_at,
                    Instant::now(),
                );
                (task, delay, state.consecutive_failures)
            };

            tracing::trace!(
                priority = task.priority,
                waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                consecutive_failures = failures,
                "dequeued task"
            );
            tokio::time::sleep(delay).await;

            let outcome = match AssertUnwindSafe((task.job)()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err("task panicked".to_string()),
            };

            let consecutive_failures = {
                let mut state = self.lock_state();
                match outcome {
                    Ok(()) => {
                        state.consecutive_failures = 0;
                        state.last_execution_at = Some(Instant::now());
                    }
                    Err(_) => state.consecutive_failures += 1,
                }
                state.consecutive_failures
            };

            metrics::record_queue_task(outcome.is_ok());
            // The caller owns the failure and records it; the queue only
            // traces how it affects pacing.
            if let Err(message) = outcome {
                tracing::debug!(
                    error = %message,
                    consecutive_failures,
                    next_delay_ms = self.policy.backoff_delay(consecutive_failures).as_millis() as u64,
                    "queued task failed"
                );
            }
        }
    }
}
