//! The outreach run: session, navigation, filtering, extraction, invitations.
//!
//! The orchestrator owns the one live context. Every phase except the
//! invitation loop runs through the retry controller; a phase that exhausts
//! its attempts ends the run with a `Failed` report that still carries the
//! progress made so far.

mod invite;
mod site;

pub use invite::InviteSummary;
pub use site::{Credentials, Creator, FilterOptions, SiteActions, parse_follower_count};

use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityRecorder, LogCategory};
use crate::config::Config;
use crate::context::LiveContext;
use crate::error::{AutomationError, Result};
use crate::queue::{PacingPolicy, QueueStatus, TaskQueue};
use crate::retry::{RetryController, RetryPolicy};
use crate::session::{SessionKey, SessionManager, SessionPolicy, SessionStore};
use crate::verification::{
    CodeSlot, ContextChallengeProbe, VerificationConfig, VerificationHandler,
};

/// What one run should do once logged in.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub credentials: Credentials,
    pub filters: FilterOptions,
    pub invitation_limit: usize,
    pub invite_spacing: Duration,
}

/// Knobs for every component the orchestrator assembles.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub pacing: PacingPolicy,
    pub retry: RetryPolicy,
    pub session: SessionPolicy,
    pub verification: VerificationConfig,
    pub plan: RunPlan,
}

impl OrchestratorConfig {
    /// Build from the loaded configuration. Fails when credentials are missing.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            pacing: config.queue.pacing(),
            retry: config.retry.policy(),
            session: config.session.policy(),
            verification: config.verification.clone(),
            plan: RunPlan {
                credentials: config.site.credentials()?,
                filters: config.site.filters(),
                invitation_limit: config.site.invitation_limit,
                invite_spacing: Duration::from_millis(config.site.invite_spacing_ms),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Restored,
    FreshLogin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Session,
    Navigate,
    Filter,
    Extract,
}

impl Phase {
    /// Operation name used for retries, logs and metrics.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Session => "Login",
            Self::Navigate => "Navigate to affiliate center",
            Self::Filter => "Apply filters",
            Self::Extract => "Extract creators",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    pub phase: Phase,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub session: Option<SessionSource>,
    pub creators_found: usize,
    pub invited: usize,
    pub failed: usize,
    pub skipped: usize,
    pub fatal: Option<FatalError>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub queue: QueueStatus,
    pub stop_requested: bool,
}

pub struct Orchestrator {
    context: Arc<dyn LiveContext>,
    site: Arc<dyn SiteActions>,
    queue: TaskQueue,
    retry: RetryController,
    sessions: SessionManager,
    recorder: Arc<ActivityRecorder>,
    codes: CodeSlot,
    stop: CancellationToken,
    plan: RunPlan,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        context: Arc<dyn LiveContext>,
        site: Arc<dyn SiteActions>,
        store: Arc<dyn SessionStore>,
        key: SessionKey,
        recorder: Arc<ActivityRecorder>,
    ) -> Self {
        let queue = TaskQueue::new(config.pacing);
        let stop = CancellationToken::new();
        let codes = CodeSlot::new();
        let probe = ContextChallengeProbe::new(
            VerificationHandler::new(config.verification, recorder.clone()),
            context.clone(),
            codes.clone(),
        );
        let retry = RetryController::new(queue.clone(), recorder.clone(), config.retry)
            .with_challenge_probe(Arc::new(probe))
            .with_stop_token(stop.clone());
        let sessions = SessionManager::new(config.session, key, store, recorder.clone());

        Self {
            context,
            site,
            queue,
            retry,
            sessions,
            recorder,
            codes,
            stop,
            plan: config.plan,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Slot for a verification code received out of band.
    pub fn code_slot(&self) -> CodeSlot {
        self.codes.clone()
    }

    /// Token cancelled by [`stop`](Self::stop); handy for wiring signals.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Request a cooperative stop. Takes effect at the next safe point.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!("stop requested");
        }
        self.stop.cancel();
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            queue: self.queue.status(),
            stop_requested: self.stop.is_cancelled(),
        }
    }

    /// Restore the persisted session, or log in afresh and persist the new one.
    pub async fn establish_session(&self) -> Result<SessionSource> {
        self.recorder.start_metric("session_handling", None);
        let result = self.establish_session_inner().await;
        let metadata = match &result {
            Ok(source) => json!({ "source": source }),
            Err(err) => json!({ "error": err.to_string() }),
        };
        self.recorder
            .end_metric("session_handling", result.is_ok(), Some(metadata))
            .await;
        result
    }

    async fn establish_session_inner(&self) -> Result<SessionSource> {
        match self.sessions.load_valid().await {
            Ok(record) => {
                if self.sessions.restore(&record, self.context.as_ref()).await {
                    self.recorder
                        .info(LogCategory::Session, "Successfully restored existing session", None)
                        .await;
                    return Ok(SessionSource::Restored);
                }
                self.log_fresh_login_reason(&AutomationError::SessionRestoreFailed)
                    .await;
            }
            Err(err) if err.requires_fresh_login() => self.log_fresh_login_reason(&err).await,
            Err(err) => return Err(err),
        }

        let site = self.site.clone();
        let credentials = self.plan.credentials.clone();
        self.retry
            .run(Phase::Session.operation(), move || {
                let site = site.clone();
                let credentials = credentials.clone();
                async move { site.login(&credentials).await }
            })
            .await?;

        // A session that cannot be saved costs a login next time, not this run.
        if let Err(err) = self.capture_and_persist().await {
            self.recorder
                .error(LogCategory::Session, "Failed to save session after login", &err, None)
                .await;
        }
        Ok(SessionSource::FreshLogin)
    }

    async fn log_fresh_login_reason(&self, reason: &AutomationError) {
        self.recorder
            .info(
                LogCategory::Session,
                "Performing fresh login",
                Some(json!({ "reason": reason.to_string() })),
            )
            .await;
    }

    async fn capture_and_persist(&self) -> anyhow::Result<()> {
        let record = self
            .sessions
            .capture(self.context.as_ref())
            .await
            .map_err(|cause| AutomationError::OperationFailed {
                operation: "Capture session".to_string(),
                cause,
            })?;
        self.sessions.persist(&record).await
    }

    /// Execute every phase in order and report what happened.
    pub async fn run(&self) -> RunReport {
        self.recorder.start_metric("bot_run", None);
        self.recorder
            .info(LogCategory::Bot, "Starting bot operations", None)
            .await;

        let mut report = RunReport::default();
        match self.run_phases(&mut report).await {
            Ok(()) if self.stop.is_cancelled() => report.status = RunStatus::Stopped,
            Ok(()) => report.status = RunStatus::Completed,
            Err((_, AutomationError::Stopped { .. })) => report.status = RunStatus::Stopped,
            Err((phase, err)) => {
                report.status = RunStatus::Failed;
                let cause = anyhow::Error::new(err);
                self.recorder
                    .error(
                        LogCategory::Bot,
                        format!("{phase} failed; ending run"),
                        &cause,
                        None,
                    )
                    .await;
                report.fatal = Some(FatalError {
                    phase,
                    message: cause.to_string(),
                });
            }
        }

        self.recorder
            .end_metric(
                "bot_run",
                report.status != RunStatus::Failed,
                Some(json!({
                    "status": report.status,
                    "creatorsFound": report.creators_found,
                    "invited": report.invited,
                    "failed": report.failed,
                })),
            )
            .await;
        self.recorder
            .info(
                LogCategory::Bot,
                "Bot operations finished",
                Some(serde_json::to_value(&report).unwrap_or_default()),
            )
            .await;
        report
    }

    async fn run_phases(
        &self,
        report: &mut RunReport,
    ) -> std::result::Result<(), (Phase, AutomationError)> {
        let source = self
            .establish_session()
            .await
            .map_err(|e| (Phase::Session, e))?;
        report.session = Some(source);

        let site = self.site.clone();
        self.retry
            .run(Phase::Navigate.operation(), move || {
                let site = site.clone();
                async move { site.navigate_to_affiliate_center().await }
            })
            .await
            .map_err(|e| (Phase::Navigate, e))?;

        let site = self.site.clone();
        let filters = self.plan.filters.clone();
        self.retry
            .run(Phase::Filter.operation(), move || {
                let site = site.clone();
                let filters = filters.clone();
                async move { site.apply_filters(&filters).await }
            })
            .await
            .map_err(|e| (Phase::Filter, e))?;

        let site = self.site.clone();
        let creators = self
            .retry
            .run(Phase::Extract.operation(), move || {
                let site = site.clone();
                async move { site.extract_creators().await }
            })
            .await
            .map_err(|e| (Phase::Extract, e))?;
        report.creators_found = creators.len();
        self.recorder
            .info(
                LogCategory::Bot,
                format!("Found {} creators", creators.len()),
                None,
            )
            .await;

        let summary = self
            .invite_creators(&creators, self.plan.invitation_limit)
            .await;
        report.invited = summary.invited;
        report.failed = summary.failed;
        report.skipped = summary.skipped;
        Ok(())
    }
}
