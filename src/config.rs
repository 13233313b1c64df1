use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::ActivityConfig;
use crate::orchestrator::{Credentials, FilterOptions};
use crate::queue::PacingPolicy;
use crate::retry::RetryPolicy;
use crate::secret::SecretString;
use crate::session::{SessionKey, SessionPolicy};
use crate::verification::VerificationConfig;

/// Environment variable overriding `site.password`.
pub const PASSWORD_ENV: &str = "OUTREACH_PASSWORD";

/// Root state directory (`~/.outreach`).
pub fn default_state_dir() -> PathBuf {
    let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home_dir.join(".outreach")
}

/// Expand `~` and environment references in a configured path.
pub fn resolve_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub session: SessionSettings,
    pub activity: ActivityConfig,
    pub verification: VerificationConfig,
    pub site: SiteSettings,
}

impl Config {
    /// Load configuration from file; a missing file yields the defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| default_state_dir().join("config.toml"));
        let config_path = resolve_path(&config_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.activity.log_dir = resolve_path(&config.activity.log_dir);
        config.session.store_path = resolve_path(&config.session.store_path);
        Ok(config)
    }
}

/// `[queue]`: pacing against the automated site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_requests_per_minute: u32,
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 20,
            base_delay_ms: 2_000,
            min_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

impl QueueSettings {
    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy {
            max_requests_per_minute: self.max_requests_per_minute,
            base_delay: Duration::from_millis(self.base_delay_ms),
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

/// `[retry]`: phase-level retry bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// `[session]`: persistence and validity bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_age_hours: u64,
    pub ttl_hours: u64,
    pub store_path: PathBuf,
    /// Environment variable holding the session encryption secret.
    pub key_env: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            ttl_hours: 24,
            store_path: default_state_dir().join("session.json"),
            key_env: "OUTREACH_SESSION_KEY".to_string(),
        }
    }
}

impl SessionSettings {
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_age: chrono::Duration::hours(self.max_age_hours as i64),
            ttl: chrono::Duration::hours(self.ttl_hours as i64),
        }
    }

    /// Resolve the encryption key from the configured environment variable.
    pub fn key(&self) -> Result<SessionKey> {
        let secret = SecretString::from_env(&self.key_env).with_context(|| {
            format!(
                "{} is not set; generate one with `outreach keygen`",
                self.key_env
            )
        })?;
        SessionKey::from_secret(&secret).context("Invalid session encryption key")
    }
}

/// `[site]`: target site, credentials and the outreach plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    pub base_url: String,
    pub email: String,
    pub password: Option<SecretString>,
    pub min_followers: u64,
    pub max_followers: u64,
    pub categories: Vec<String>,
    pub invitation_limit: usize,
    pub invite_spacing_ms: u64,
    pub headless: bool,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://seller.tiktok.com".to_string(),
            email: String::new(),
            password: None,
            min_followers: 1_000,
            max_followers: 2_000,
            categories: Vec::new(),
            invitation_limit: 60,
            invite_spacing_ms: 2_000,
            headless: true,
        }
    }
}

impl SiteSettings {
    /// Login credentials, with `OUTREACH_PASSWORD` taking precedence over the file.
    pub fn credentials(&self) -> Result<Credentials> {
        let password = SecretString::from_env(PASSWORD_ENV)
            .or_else(|| self.password.clone())
            .filter(|p| !p.is_empty())
            .with_context(|| format!("No password configured (set site.password or {PASSWORD_ENV})"))?;
        if self.email.trim().is_empty() {
            anyhow::bail!("No login email configured (set site.email)");
        }
        Ok(Credentials {
            email: self.email.clone(),
            password,
        })
    }

    pub fn filters(&self) -> FilterOptions {
        FilterOptions {
            min_followers: self.min_followers,
            max_followers: self.max_followers,
            categories: self.categories.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.queue.max_requests_per_minute, 20);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.session.max_age_hours, 24);
        assert_eq!(config.activity.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.activity.max_rotated_files, 5);
        assert_eq!(config.site.invitation_limit, 60);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = Config::from_toml(
            r#"
            [queue]
            max_requests_per_minute = 6

            [retry]
            max_attempts = 5

            [site]
            email = "ops@example.com"
            categories = ["beauty", "home"]
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_requests_per_minute, 6);
        assert_eq!(config.queue.base_delay_ms, 2_000);
        assert_eq!(config.retry.policy().max_attempts, 5);
        assert_eq!(config.site.filters().categories, vec!["beauty", "home"]);
    }

    #[test]
    fn pacing_policy_uses_millisecond_fields() {
        let pacing = QueueSettings::default().pacing();
        assert_eq!(pacing.base_delay, Duration::from_secs(2));
        assert_eq!(pacing.max_delay, Duration::from_secs(30));
        assert_eq!(pacing.spacing(), Duration::from_secs(3));
    }

    #[test]
    fn tilde_paths_are_expanded() {
        let config = Config::from_toml("[activity]\nlog_dir = \"~/outreach-logs\"").unwrap();
        assert!(!config.activity.log_dir.to_string_lossy().starts_with('~'));
    }
}
