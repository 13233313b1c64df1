//! Retry controller for the orchestrator's phases.
//!
//! Every attempt is funnelled through the shared [`TaskQueue`] and timed as
//! `operation_<name>`. Between failed attempts the verification probe gets a
//! chance to clear a challenge. If it does, the next attempt starts right
//! away; otherwise the controller backs off.

mod policy;

pub use policy::RetryPolicy;

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityRecorder, LogCategory, LogLevel};
use crate::error::{AutomationError, Result};
use crate::metrics;
use crate::queue::TaskQueue;
use crate::verification::{ChallengeKind, ChallengeProbe, ChallengeStatus};

/// Why another attempt is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// A verification challenge was detected and resolved.
    ChallengeResolved,
    /// Plain exponential backoff.
    Backoff,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChallengeResolved => "challenge_resolved",
            Self::Backoff => "backoff",
        }
    }
}

/// Metadata for one scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub reason: RetryReason,
}

pub struct RetryController {
    queue: TaskQueue,
    recorder: Arc<ActivityRecorder>,
    policy: RetryPolicy,
    challenges: Option<Arc<dyn ChallengeProbe>>,
    stop: CancellationToken,
    priority: i32,
}

impl RetryController {
    pub fn new(queue: TaskQueue, recorder: Arc<ActivityRecorder>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            recorder,
            policy,
            challenges: None,
            stop: CancellationToken::new(),
            priority: 0,
        }
    }

    /// Consult `probe` between failed attempts.
    pub fn with_challenge_probe(mut self, probe: Arc<dyn ChallengeProbe>) -> Self {
        self.challenges = Some(probe);
        self
    }

    /// Refuse to start new attempts once `token` is cancelled.
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// Queue priority used for every attempt.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// [`run_with_retry`](Self::run_with_retry) with the policy's attempt budget.
    pub async fn run<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.run_with_retry(operation, name, self.policy.max_attempts)
            .await
    }

    /// Run `operation` up to `max_attempts` times.
    ///
    /// The operation is invoked at most `max_attempts` times. Exhaustion
    /// yields [`AutomationError::RetryExhausted`] carrying the last failure;
    /// a cancelled stop token yields [`AutomationError::Stopped`] before the
    /// next attempt starts. A budget of zero never runs the operation and is
    /// reported as exhausted after 0 attempts.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        name: &str,
        max_attempts: u32,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let metric = format!("operation_{name}");
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.stop.is_cancelled() {
                return Err(AutomationError::Stopped {
                    operation: name.to_string(),
                });
            }

            self.recorder
                .start_metric(&metric, Some(json!({ "attempt": attempt })));
            let task = operation();
            match self.queue.enqueue(move || task, self.priority).await {
                Ok(value) => {
                    self.recorder.end_metric(&metric, true, None).await;
                    return Ok(value);
                }
                Err(err) => {
                    self.recorder
                        .end_metric(&metric, false, Some(json!({ "error": format!("{err:#}") })))
                        .await;
                    self.recorder
                        .log(
                            LogLevel::Warn,
                            LogCategory::Bot,
                            format!("{name} failed, attempt {attempt}/{max_attempts}"),
                            Some(json!({ "attempt": attempt, "maxAttempts": max_attempts })),
                            Some(&err),
                        )
                        .await;
                    last_error = Some(err);
                }
            }

            if attempt == max_attempts {
                break;
            }

            let retry = if self.challenge_cleared(name).await {
                RetryAttempt {
                    attempt,
                    delay: Duration::ZERO,
                    reason: RetryReason::ChallengeResolved,
                }
            } else {
                RetryAttempt {
                    attempt,
                    delay: self.policy.delay_after_attempt(attempt),
                    reason: RetryReason::Backoff,
                }
            };
            metrics::record_retry(name, retry.reason.as_str());
            tracing::debug!(
                operation = name,
                attempt = retry.attempt,
                delay_ms = retry.delay.as_millis() as u64,
                reason = retry.reason.as_str(),
                "retrying"
            );

            if !retry.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(retry.delay) => {}
                    _ = self.stop.cancelled() => {
                        return Err(AutomationError::Stopped {
                            operation: name.to_string(),
                        });
                    }
                }
            }
        }

        Err(AutomationError::RetryExhausted {
            operation: name.to_string(),
            attempts: max_attempts,
            last_error: last_error
                .unwrap_or_else(|| anyhow::anyhow!("no attempts allowed")),
        })
    }

    /// Give the verification probe a chance after a failure. `true` only
    /// when a challenge was present and has been resolved.
    async fn challenge_cleared(&self, name: &str) -> bool {
        let Some(probe) = &self.challenges else {
            return false;
        };
        let challenge = probe.check_and_resolve().await;
        match (challenge.kind, challenge.status) {
            (ChallengeKind::None, _) => false,
            (kind, ChallengeStatus::Resolved) => {
                self.recorder
                    .info(
                        LogCategory::Captcha,
                        format!("Verification cleared, retrying {name}"),
                        Some(json!({ "kind": kind.as_str() })),
                    )
                    .await;
                true
            }
            (kind, status) => {
                let err = anyhow::Error::new(AutomationError::ChallengeUnresolved { kind });
                self.recorder
                    .log(
                        LogLevel::Warn,
                        LogCategory::Captcha,
                        format!("Verification not cleared before retrying {name}"),
                        Some(json!({ "kind": kind.as_str(), "status": status.as_str() })),
                        Some(&err),
                    )
                    .await;
                false
            }
        }
    }
}
