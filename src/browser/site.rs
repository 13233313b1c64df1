use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use serde::Deserialize;
use std::time::Duration;

use super::{click, element_exists, eval, fill, js_literal, wait_for_navigation, wait_for_selector};
use crate::orchestrator::{Creator, Credentials, FilterOptions, SiteActions, parse_follower_count};
use crate::secret::ExposeSecret;

const EMAIL_PANEL_BUTTON: &str = "#TikTok_Ads_SSO_Login_Email_Panel_Button";
const EMAIL_INPUT: &str = r#"input[name="email"]"#;
const PASSWORD_INPUT: &str = r#"input[name="password"]"#;
const LOGIN_BUTTON: &str = "#TikTok_Ads_SSO_Login_Btn";
const AFFILIATE_LINK: &str = r#"a[href*="affiliate"]"#;
const FILTER_BUTTON: &str = r#"button[data-e2e="filter-button"]"#;
const FILTER_MODAL: &str = ".filter-modal";
const MIN_FOLLOWERS_INPUT: &str = r#"input[name="min-followers"]"#;
const MAX_FOLLOWERS_INPUT: &str = r#"input[name="max-followers"]"#;
const APPLY_FILTERS_BUTTON: &str = r#"button[type="submit"]"#;
const LOADING_INDICATOR: &str = ".loading-indicator";
const INVITE_CONFIRMATION: &str = ".invitation-sent-message";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Affiliate-center steps for the seller dashboard.
#[derive(Clone)]
pub struct BrowserSite {
    page: Page,
    base_url: String,
}

impl BrowserSite {
    pub fn new(page: Page, base_url: impl Into<String>) -> Self {
        Self {
            page,
            base_url: base_url.into(),
        }
    }

    async fn navigate_and_wait(&self, selector: &str) -> Result<()> {
        click(&self.page, selector).await?;
        if !wait_for_navigation(&self.page, NAVIGATION_TIMEOUT).await? {
            anyhow::bail!("no navigation after clicking {selector}");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawCreator {
    username: String,
    followers: String,
    #[serde(default)]
    name: Option<String>,
}

#[async_trait]
impl SiteActions for BrowserSite {
    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.page
            .goto(self.base_url.as_str())
            .await
            .with_context(|| format!("Failed to open {}", self.base_url))?;

        if element_exists(&self.page, EMAIL_PANEL_BUTTON).await.unwrap_or(false) {
            click(&self.page, EMAIL_PANEL_BUTTON).await?;
        }
        wait_for_selector(&self.page, EMAIL_INPUT, true, ELEMENT_TIMEOUT).await?;
        fill(&self.page, EMAIL_INPUT, &credentials.email).await?;
        fill(&self.page, PASSWORD_INPUT, credentials.password.expose_secret()).await?;
        self.navigate_and_wait(LOGIN_BUTTON)
            .await
            .context("Login did not complete")
    }

    async fn navigate_to_affiliate_center(&self) -> Result<()> {
        self.navigate_and_wait(AFFILIATE_LINK).await
    }

    async fn apply_filters(&self, filters: &FilterOptions) -> Result<()> {
        click(&self.page, FILTER_BUTTON).await?;
        wait_for_selector(&self.page, FILTER_MODAL, true, ELEMENT_TIMEOUT).await?;

        fill(&self.page, MIN_FOLLOWERS_INPUT, &filters.min_followers.to_string()).await?;
        fill(&self.page, MAX_FOLLOWERS_INPUT, &filters.max_followers.to_string()).await?;
        for category in &filters.categories {
            let selector = format!("label[data-value={}]", js_literal(category)?);
            click(&self.page, &selector).await?;
        }

        click(&self.page, APPLY_FILTERS_BUTTON).await?;
        wait_for_selector(&self.page, LOADING_INDICATOR, false, NAVIGATION_TIMEOUT).await
    }

    async fn extract_creators(&self) -> Result<Vec<Creator>> {
        let raw: Vec<RawCreator> = eval(
            &self.page,
            r#"Array.from(document.querySelectorAll('.creator-card')).map(card => ({
                username: (card.querySelector('.username')?.textContent || '').trim(),
                followers: (card.querySelector('.followers')?.textContent || '').trim(),
                name: card.querySelector('.display-name')?.textContent?.trim() || null,
            }))"#
                .to_string(),
        )
        .await?;

        Ok(raw
            .into_iter()
            .filter(|c| !c.username.is_empty())
            .filter_map(|c| {
                let followers = parse_follower_count(&c.followers);
                if followers.is_none() {
                    tracing::debug!(username = %c.username, raw = %c.followers, "unparseable follower count");
                }
                Some(Creator {
                    username: c.username,
                    followers: followers?,
                    display_name: c.name,
                })
            })
            .collect())
    }

    async fn invite_creator(&self, creator: &Creator) -> Result<()> {
        let selector = format!(
            "button[data-creator-id={}]",
            js_literal(&creator.username)?
        );
        click(&self.page, &selector).await?;
        wait_for_selector(&self.page, INVITE_CONFIRMATION, true, ELEMENT_TIMEOUT)
            .await
            .with_context(|| format!("No confirmation after inviting {}", creator.username))
    }
}
