//! Failure taxonomy shared by the orchestration core.
//!
//! Only [`AutomationError::RetryExhausted`] aborts a run. Every other variant
//! is absorbed and logged by the layer that produced it.

use chrono::{DateTime, Utc};

use crate::session::SessionCryptoError;
use crate::verification::ChallengeKind;

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("no persisted session available")]
    SessionMissing,

    #[error("persisted session expired (captured {captured_at}, expires {expires_at})")]
    SessionExpired {
        captured_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("persisted session could not be applied to the live context")]
    SessionRestoreFailed,

    #[error(transparent)]
    Session(#[from] SessionCryptoError),

    #[error("{kind} verification challenge was not resolved")]
    ChallengeUnresolved { kind: ChallengeKind },

    #[error("{operation} failed: {cause:#}")]
    OperationFailed {
        operation: String,
        cause: anyhow::Error,
    },

    #[error("{operation} failed after {attempts} attempts: {last_error:#}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: anyhow::Error,
    },

    #[error("invitation to {creator} failed: {cause:#}")]
    PerCreatorInviteFailed {
        creator: String,
        cause: anyhow::Error,
    },

    #[error("{operation} skipped: stop requested")]
    Stopped { operation: String },
}

impl AutomationError {
    /// Whether this error ends the overall run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Session problems that mean "log in interactively" rather than "give up".
    pub fn requires_fresh_login(&self) -> bool {
        matches!(
            self,
            Self::SessionMissing
                | Self::SessionExpired { .. }
                | Self::SessionRestoreFailed
                | Self::Session(_)
        )
    }
}

pub type Result<T, E = AutomationError> = std::result::Result<T, E>;
