//! Session capture, restore, validity and encrypted persistence.
//!
//! A session is `Absent` until a login is captured, `Valid` while both the
//! age bound and the expiry hold, and `Expired` once either is crossed.
//! Invalidation returns it to `Absent`; a fresh login overwrites it.

mod crypto;
mod store;

pub use crypto::{
    EncryptedSessionRecord, SessionCryptoError, SessionKey, decrypt_session, encrypt_session,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::activity::{ActivityRecorder, LogCategory};
use crate::context::{Cookie, LiveContext, StorageMap, Viewport, origin_of};
use crate::error::{AutomationError, Result};

/// Everything needed to resume an authenticated browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Origin of the page the session was captured on. Restoring opens it
    /// before writing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub cookies: Vec<Cookie>,
    pub local_storage: StorageMap,
    pub session_storage: StorageMap,
    pub user_agent: String,
    pub viewport: Viewport,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Oldest a captured session may be, regardless of `expires_at`.
    pub max_age: Duration,
    /// `expires_at = captured_at + ttl` at capture time.
    pub ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
            ttl: Duration::hours(24),
        }
    }
}

impl SessionPolicy {
    /// `now - captured_at < max_age` and `expires_at > now`.
    pub fn is_valid_at(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.captured_at < self.max_age && record.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Valid,
    Expired,
}

pub struct SessionManager {
    policy: SessionPolicy,
    key: SessionKey,
    store: Arc<dyn SessionStore>,
    recorder: Arc<ActivityRecorder>,
}

impl SessionManager {
    pub fn new(
        policy: SessionPolicy,
        key: SessionKey,
        store: Arc<dyn SessionStore>,
        recorder: Arc<ActivityRecorder>,
    ) -> Self {
        Self {
            policy,
            key,
            store,
            recorder,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Read the authentication artifacts of the live context.
    pub async fn capture(&self, ctx: &dyn LiveContext) -> anyhow::Result<SessionRecord> {
        let origin = origin_of(&ctx.current_url().await?);
        let cookies = ctx.cookies().await?;
        let local_storage = ctx.local_storage().await?;
        let session_storage = ctx.session_storage().await?;
        let user_agent = ctx.user_agent().await?;
        let viewport = ctx.viewport().await?;
        let captured_at = Utc::now();

        self.recorder
            .info(
                LogCategory::Session,
                "Captured browser session",
                Some(json!({
                    "cookies": cookies.len(),
                    "localStorage": local_storage.len(),
                    "sessionStorage": session_storage.len(),
                })),
            )
            .await;

        Ok(SessionRecord {
            origin,
            cookies,
            local_storage,
            session_storage,
            user_agent,
            viewport,
            captured_at,
            expires_at: captured_at + self.policy.ttl,
        })
    }

    pub fn is_valid(&self, record: &SessionRecord) -> bool {
        self.policy.is_valid_at(record, Utc::now())
    }

    pub fn state(&self, record: Option<&SessionRecord>, now: DateTime<Utc>) -> SessionState {
        match record {
            None => SessionState::Absent,
            Some(record) if self.policy.is_valid_at(record, now) => SessionState::Valid,
            Some(_) => SessionState::Expired,
        }
    }

    /// Apply `record` to the live context: cookies, then the captured origin
    /// (so storage lands on the authenticated site), then both storage areas,
    /// then viewport and user agent. Returns `false` (and logs) on the first
    /// failing step; never raises.
    pub async fn restore(&self, record: &SessionRecord, ctx: &dyn LiveContext) -> bool {
        let steps = async {
            ctx.set_cookies(&record.cookies)
                .await
                .map_err(|e| ("cookies", e))?;
            if let Some(origin) = &record.origin {
                ctx.open(origin).await.map_err(|e| ("origin", e))?;
            }
            ctx.set_local_storage(&record.local_storage)
                .await
                .map_err(|e| ("localStorage", e))?;
            ctx.set_session_storage(&record.session_storage)
                .await
                .map_err(|e| ("sessionStorage", e))?;
            ctx.set_viewport(record.viewport)
                .await
                .map_err(|e| ("viewport", e))?;
            ctx.set_user_agent(&record.user_agent)
                .await
                .map_err(|e| ("userAgent", e))?;
            Ok::<_, (&str, anyhow::Error)>(())
        };

        match steps.await {
            Ok(()) => {
                self.recorder
                    .info(LogCategory::Session, "Session restored", None)
                    .await;
                true
            }
            Err((step, err)) => {
                self.recorder
                    .error(
                        LogCategory::Session,
                        "Failed to restore session",
                        &err,
                        Some(json!({ "step": step })),
                    )
                    .await;
                false
            }
        }
    }

    pub fn encrypt(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<EncryptedSessionRecord, SessionCryptoError> {
        encrypt_session(record, &self.key)
    }

    pub fn decrypt(
        &self,
        encrypted: &EncryptedSessionRecord,
    ) -> std::result::Result<SessionRecord, SessionCryptoError> {
        decrypt_session(encrypted, &self.key)
    }

    /// Encrypt and store `record`, replacing any previous one.
    pub async fn persist(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let encrypted = self.encrypt(record)?;
        self.store.save(&encrypted).await?;
        self.recorder
            .info(
                LogCategory::Session,
                "Session saved",
                Some(json!({ "expiresAt": record.expires_at })),
            )
            .await;
        Ok(())
    }

    /// Load the stored session if it decrypts and is still valid.
    ///
    /// Every error here means "log in again" (see
    /// [`AutomationError::requires_fresh_login`]).
    pub async fn load_valid(&self) -> Result<SessionRecord> {
        let encrypted = match self.store.load().await {
            Ok(Some(encrypted)) => encrypted,
            Ok(None) => return Err(AutomationError::SessionMissing),
            Err(err) => {
                self.recorder
                    .error(LogCategory::Session, "Failed to load stored session", &err, None)
                    .await;
                return Err(AutomationError::SessionMissing);
            }
        };

        let record = match self.decrypt(&encrypted) {
            Ok(record) => record,
            Err(err) => {
                self.recorder
                    .warn(
                        LogCategory::Session,
                        "Stored session could not be decrypted",
                        Some(json!({ "error": err.to_string() })),
                    )
                    .await;
                return Err(err.into());
            }
        };

        if !self.is_valid(&record) {
            self.recorder
                .info(
                    LogCategory::Session,
                    "Stored session expired",
                    Some(json!({
                        "capturedAt": record.captured_at,
                        "expiresAt": record.expires_at,
                    })),
                )
                .await;
            return Err(AutomationError::SessionExpired {
                captured_at: record.captured_at,
                expires_at: record.expires_at,
            });
        }
        Ok(record)
    }

    /// Drop the stored session.
    pub async fn invalidate(&self) -> anyhow::Result<()> {
        self.store.clear().await?;
        self.recorder
            .info(LogCategory::Session, "Session invalidated", None)
            .await;
        Ok(())
    }

    /// State of whatever is currently stored. Undecryptable counts as absent.
    pub async fn stored_state(&self) -> SessionState {
        let record = match self.store.load().await {
            Ok(Some(encrypted)) => self.decrypt(&encrypted).ok(),
            _ => None,
        };
        self.state(record.as_ref(), Utc::now())
    }

    /// Decrypted stored record regardless of validity, for status reporting.
    pub async fn stored_record(&self) -> Option<SessionRecord> {
        match self.store.load().await {
            Ok(Some(encrypted)) => self.decrypt(&encrypted).ok(),
            _ => None,
        }
    }
}
