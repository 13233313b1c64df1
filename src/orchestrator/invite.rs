use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use super::{Creator, Orchestrator};
use crate::activity::{LogCategory, LogLevel};
use crate::error::AutomationError;
use crate::metrics;

/// Counters for one pass over the creator list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InviteSummary {
    pub invited: usize,
    pub failed: usize,
    /// Creators never attempted (limit reached or stop requested).
    pub skipped: usize,
    pub stopped: bool,
}

impl Orchestrator {
    /// Invite `creators` in order, at most `limit` successfully.
    ///
    /// Each invitation goes through the queue exactly once. Failures are
    /// counted and logged, never retried and never fatal. The stop token is
    /// checked before every creator.
    pub async fn invite_creators(&self, creators: &[Creator], limit: usize) -> InviteSummary {
        let mut summary = InviteSummary::default();
        self.recorder.start_metric("invite_creators", None);

        for (index, creator) in creators.iter().enumerate() {
            if index > 0 && !self.plan.invite_spacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.plan.invite_spacing) => {}
                    _ = self.stop.cancelled() => {}
                }
            }
            if self.stop.is_cancelled() {
                summary.stopped = true;
                summary.skipped = creators.len() - index;
                self.recorder
                    .info(
                        LogCategory::Bot,
                        "Stop requested; ending invitations",
                        Some(json!({ "remaining": summary.skipped })),
                    )
                    .await;
                break;
            }
            if summary.invited >= limit {
                summary.skipped = creators.len() - index;
                self.recorder
                    .info(
                        LogCategory::Bot,
                        "Reached invitation limit",
                        Some(json!({ "limit": limit })),
                    )
                    .await;
                break;
            }

            let started = Instant::now();
            let site = self.site.clone();
            let target = creator.clone();
            let outcome = self
                .queue
                .enqueue(move || async move { site.invite_creator(&target).await }, 0)
                .await;
            let metadata = Some(json!({
                "creator": creator.username,
                "followers": creator.followers,
            }));

            match outcome {
                Ok(()) => {
                    summary.invited += 1;
                    metrics::record_invitation(true);
                    self.recorder
                        .track_action("invite_creator", true, started.elapsed(), metadata)
                        .await;
                }
                Err(cause) => {
                    summary.failed += 1;
                    metrics::record_invitation(false);
                    let err = anyhow::Error::new(AutomationError::PerCreatorInviteFailed {
                        creator: creator.username.clone(),
                        cause,
                    });
                    self.recorder
                        .log(
                            LogLevel::Warn,
                            LogCategory::Action,
                            format!("Failed to invite {}", creator.username),
                            metadata.clone(),
                            Some(&err),
                        )
                        .await;
                    self.recorder
                        .track_action("invite_creator", false, started.elapsed(), metadata)
                        .await;
                }
            }
        }

        self.recorder
            .end_metric(
                "invite_creators",
                true,
                Some(json!({
                    "invited": summary.invited,
                    "failed": summary.failed,
                    "skipped": summary.skipped,
                    "stopped": summary.stopped,
                })),
            )
            .await;
        summary
    }
}
