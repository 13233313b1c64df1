//! Verification (CAPTCHA) challenge detection and single-shot resolution.
//!
//! Detection tests marker sets in a fixed order (code, slider, image) and
//! stops at the first match. Resolution makes exactly one attempt and reports
//! the outcome as a [`ChallengeStatus`]; a caller wanting another attempt
//! calls again, normally from the next retry.

mod markers;

pub use markers::VerificationConfig;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::activity::{ActivityRecorder, LogCategory};
use crate::context::{LiveContext, Point};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    None,
    Code,
    Slider,
    Image,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Code => "code",
            Self::Slider => "slider",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Could not be attempted (e.g. no code supplied).
    Unresolved,
    Resolved,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one detect-and-resolve pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationChallenge {
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
}

impl VerificationChallenge {
    /// Nothing was detected.
    pub fn none() -> Self {
        Self {
            kind: ChallengeKind::None,
            status: ChallengeStatus::Resolved,
        }
    }

    /// A challenge was present and has been cleared.
    pub fn is_resolved(&self) -> bool {
        self.kind != ChallengeKind::None && self.status == ChallengeStatus::Resolved
    }
}

/// Holds a verification code supplied from outside (CLI, operator) until the
/// next code challenge consumes it.
#[derive(Debug, Clone, Default)]
pub struct CodeSlot {
    code: Arc<Mutex<Option<String>>>,
}

impl CodeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `code`, replacing any unused one.
    pub fn supply(&self, code: impl Into<String>) {
        let code = code.into().trim().to_string();
        *self.code.lock().unwrap_or_else(|p| p.into_inner()) = Some(code).filter(|c| !c.is_empty());
    }

    /// Take the code, leaving the slot empty.
    pub fn take(&self) -> Option<String> {
        self.code.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn is_filled(&self) -> bool {
        self.code.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

/// Detects and resolves a challenge on whatever context it owns.
#[async_trait]
pub trait ChallengeProbe: Send + Sync {
    async fn check_and_resolve(&self) -> VerificationChallenge;
}

pub struct VerificationHandler {
    config: VerificationConfig,
    recorder: Arc<ActivityRecorder>,
}

impl VerificationHandler {
    pub fn new(config: VerificationConfig, recorder: Arc<ActivityRecorder>) -> Self {
        Self { config, recorder }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Classify the challenge currently shown, if any.
    pub async fn detect(&self, ctx: &dyn LiveContext) -> ChallengeKind {
        let checks = [
            (ChallengeKind::Code, &self.config.code_markers),
            (ChallengeKind::Slider, &self.config.slider_markers),
            (ChallengeKind::Image, &self.config.image_markers),
        ];
        for (kind, markers) in checks {
            if any_present(ctx, markers).await {
                return kind;
            }
        }
        ChallengeKind::None
    }

    /// Make one attempt at clearing a challenge of `kind`.
    pub async fn resolve(
        &self,
        ctx: &dyn LiveContext,
        kind: ChallengeKind,
        code: Option<&str>,
    ) -> ChallengeStatus {
        if kind == ChallengeKind::None {
            return ChallengeStatus::Resolved;
        }
        self.recorder
            .info(
                LogCategory::Captcha,
                "Attempting to handle verification",
                Some(json!({ "kind": kind.as_str() })),
            )
            .await;

        let status = match kind {
            ChallengeKind::None => ChallengeStatus::Resolved,
            ChallengeKind::Code => self.resolve_code(ctx, code).await,
            ChallengeKind::Slider => self.resolve_slider(ctx).await,
            ChallengeKind::Image => self.resolve_image(ctx).await,
        };

        metrics::record_challenge(kind.as_str(), status.as_str());
        let metadata = Some(json!({ "kind": kind.as_str(), "status": status.as_str() }));
        match status {
            ChallengeStatus::Resolved => {
                self.recorder
                    .info(LogCategory::Captcha, "Verification resolved", metadata)
                    .await
            }
            _ => {
                self.recorder
                    .warn(LogCategory::Captcha, "Verification not resolved", metadata)
                    .await
            }
        }
        status
    }

    async fn resolve_code(&self, ctx: &dyn LiveContext, code: Option<&str>) -> ChallengeStatus {
        let Some(code) = code else {
            self.recorder
                .warn(LogCategory::Captcha, "Verification code required but none supplied", None)
                .await;
            return ChallengeStatus::Unresolved;
        };

        let mut typed = false;
        for selector in &self.config.code_inputs {
            match ctx.type_into(selector, code).await {
                Ok(true) => {
                    typed = true;
                    break;
                }
                Ok(false) => {}
                Err(err) => tracing::debug!(selector = %selector, error = %err, "code input not usable"),
            }
        }
        if !typed {
            return ChallengeStatus::Failed;
        }

        match ctx.click_button_labelled(&self.config.submit_labels).await {
            Ok(true) => {}
            Ok(false) => return ChallengeStatus::Failed,
            Err(err) => {
                self.recorder
                    .error(LogCategory::Captcha, "Could not submit verification code", &err, None)
                    .await;
                return ChallengeStatus::Failed;
            }
        }

        match ctx
            .wait_for_navigation(self.config.code_confirm_timeout())
            .await
        {
            Ok(true) => return ChallengeStatus::Resolved,
            Ok(false) => {}
            Err(err) => tracing::debug!(error = %err, "waiting for navigation after code submit"),
        }
        // No navigation: cleared iff the code input went away.
        if any_present(ctx, &self.config.code_markers).await {
            ChallengeStatus::Failed
        } else {
            ChallengeStatus::Resolved
        }
    }

    async fn resolve_slider(&self, ctx: &dyn LiveContext) -> ChallengeStatus {
        let Some(handle) = first_box(ctx, &self.config.slider_handles).await else {
            return ChallengeStatus::Failed;
        };
        let Some(track) = first_box(ctx, &self.config.slider_markers).await else {
            return ChallengeStatus::Failed;
        };

        let start = handle.center();
        let end = Point {
            x: (track.right() - self.config.slider_end_margin_px).max(start.x),
            y: start.y,
        };
        let drag = async {
            ctx.mouse_down(start).await?;
            ctx.mouse_move(end).await?;
            ctx.mouse_up(end).await
        };
        if let Err(err) = drag.await {
            self.recorder
                .error(LogCategory::Captcha, "Slider drag failed", &err, None)
                .await;
            return ChallengeStatus::Failed;
        }

        tokio::time::sleep(self.config.slider_settle()).await;
        if any_present(ctx, &self.config.slider_markers).await {
            ChallengeStatus::Failed
        } else {
            ChallengeStatus::Resolved
        }
    }

    async fn resolve_image(&self, ctx: &dyn LiveContext) -> ChallengeStatus {
        self.recorder
            .warn(
                LogCategory::Captcha,
                "Image verification detected; manual intervention may be required",
                None,
            )
            .await;

        if let Some(image) = first_box(ctx, &self.config.image_markers).await {
            let at = image.center();
            let click = async {
                ctx.mouse_down(at).await?;
                ctx.mouse_up(at).await
            };
            if let Err(err) = click.await {
                tracing::debug!(error = %err, "image challenge click failed");
            }
        }
        if let Err(err) = ctx.click_button_labelled(&self.config.submit_labels).await {
            tracing::debug!(error = %err, "image challenge confirm failed");
        }

        tokio::time::sleep(self.config.image_settle()).await;
        if any_present(ctx, &self.config.image_markers).await {
            self.recorder
                .warn(
                    LogCategory::Captcha,
                    "Image verification still present; manual intervention required",
                    None,
                )
                .await;
            ChallengeStatus::Failed
        } else {
            ChallengeStatus::Resolved
        }
    }
}

/// A probe error counts as "marker absent".
async fn any_present(ctx: &dyn LiveContext, selectors: &[String]) -> bool {
    for selector in selectors {
        match ctx.has_element(selector).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => tracing::debug!(selector = %selector, error = %err, "marker probe failed"),
        }
    }
    false
}

async fn first_box(ctx: &dyn LiveContext, selectors: &[String]) -> Option<crate::context::BoundingBox> {
    for selector in selectors {
        if let Ok(Some(bbox)) = ctx.bounding_box(selector).await {
            return Some(bbox);
        }
    }
    None
}

/// [`ChallengeProbe`] over the orchestrator's live context.
pub struct ContextChallengeProbe {
    handler: VerificationHandler,
    context: Arc<dyn LiveContext>,
    codes: CodeSlot,
}

impl ContextChallengeProbe {
    pub fn new(handler: VerificationHandler, context: Arc<dyn LiveContext>, codes: CodeSlot) -> Self {
        Self {
            handler,
            context,
            codes,
        }
    }
}

#[async_trait]
impl ChallengeProbe for ContextChallengeProbe {
    async fn check_and_resolve(&self) -> VerificationChallenge {
        let ctx = self.context.as_ref();
        let kind = self.handler.detect(ctx).await;
        if kind == ChallengeKind::None {
            return VerificationChallenge::none();
        }
        let code = match kind {
            ChallengeKind::Code => self.codes.take(),
            _ => None,
        };
        let status = self.handler.resolve(ctx, kind, code.as_deref()).await;
        VerificationChallenge { kind, status }
    }
}
