use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

/// Creator search filters applied in the affiliate center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub min_followers: u64,
    pub max_followers: u64,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A creator listed after filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub username: String,
    pub followers: u64,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Creator {
    pub fn new(username: impl Into<String>, followers: u64) -> Self {
        Self {
            username: username.into(),
            followers,
            display_name: None,
        }
    }
}

/// Site-specific steps driven by the orchestrator. Each call is one attempt;
/// retrying is the caller's business.
#[async_trait]
pub trait SiteActions: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> anyhow::Result<()>;

    async fn navigate_to_affiliate_center(&self) -> anyhow::Result<()>;

    async fn apply_filters(&self, filters: &FilterOptions) -> anyhow::Result<()>;

    async fn extract_creators(&self) -> anyhow::Result<Vec<Creator>>;

    async fn invite_creator(&self, creator: &Creator) -> anyhow::Result<()>;
}

/// Follower counts as the site prints them: "1,234", "12.5K", "1.2M".
pub fn parse_follower_count(text: &str) -> Option<u64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let cleaned = cleaned
        .trim_end_matches(|c: char| c.is_alphabetic() && !matches!(c, 'k' | 'K' | 'm' | 'M' | 'b' | 'B'));
    let (number, multiplier) = match cleaned.chars().last()? {
        'k' | 'K' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'm' | 'M' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        'b' | 'B' => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned, 1.0),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follower_counts_parse_with_suffixes() {
        assert_eq!(parse_follower_count("1,234"), Some(1_234));
        assert_eq!(parse_follower_count("12.5K"), Some(12_500));
        assert_eq!(parse_follower_count(" 1.2M "), Some(1_200_000));
        assert_eq!(parse_follower_count("980"), Some(980));
        assert_eq!(parse_follower_count(""), None);
        assert_eq!(parse_follower_count("n/a"), None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            email: "ops@example.com".into(),
            password: SecretString::from("hunter2"),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
