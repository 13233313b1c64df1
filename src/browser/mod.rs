//! Chromium (CDP) implementation of the live context and the site steps.
//!
//! One browser, one page. [`BrowserContext`] and [`BrowserSite`] are cheap
//! handles onto that page; the orchestrator serializes their use through the
//! task queue.

mod context;
mod site;

pub use context::BrowserContext;
pub use site::BrowserSite;

use anyhow::{Context as AnyhowContext, Result};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::Viewport;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: tokio::task::JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(headless: bool, viewport: Viewport) -> Result<Self> {
        let mut builder = BrowserConfig::builder().window_size(viewport.width, viewport.height);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(anyhow::Error::msg)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        // The CDP event stream must be drained for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;
        tracing::info!(headless, "browser launched");
        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub fn context(&self) -> BrowserContext {
        BrowserContext::new(self.page.clone())
    }

    pub fn site(&self, base_url: impl Into<String>) -> BrowserSite {
        BrowserSite::new(self.page.clone(), base_url)
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("Failed to close browser")?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

/// Render `value` as a JavaScript literal.
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

async fn eval<T: DeserializeOwned>(page: &Page, script: String) -> Result<T> {
    let result = page
        .evaluate(script)
        .await
        .context("Script evaluation failed")?;
    result
        .into_value::<T>()
        .context("Unexpected script result")
}

async fn element_exists(page: &Page, selector: &str) -> Result<bool> {
    eval(
        page,
        format!("document.querySelector({}) !== null", js_literal(selector)?),
    )
    .await
}

/// Poll until `selector` is present (or absent, when `present` is false).
async fn wait_for_selector(
    page: &Page,
    selector: &str,
    present: bool,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if element_exists(page, selector).await.unwrap_or(false) == present {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!(
                "timed out after {:?} waiting for {selector} to {}",
                timeout,
                if present { "appear" } else { "disappear" }
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_navigation(page: &Page, timeout: Duration) -> Result<bool> {
    match tokio::time::timeout(timeout, page.wait_for_navigation()).await {
        Ok(Ok(_)) => Ok(true),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context("Navigation failed")),
        Err(_) => Ok(false),
    }
}

async fn click(page: &Page, selector: &str) -> Result<()> {
    page.find_element(selector)
        .await
        .with_context(|| format!("Element not found: {selector}"))?
        .click()
        .await
        .with_context(|| format!("Failed to click {selector}"))?;
    Ok(())
}

/// Clear the field matching `selector` and type `text` into it.
async fn fill(page: &Page, selector: &str, text: &str) -> Result<()> {
    let element = page
        .find_element(selector)
        .await
        .with_context(|| format!("Element not found: {selector}"))?;
    element.click().await?;
    let _: bool = eval(
        page,
        format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = ''; return true; }})()",
            js_literal(selector)?
        ),
    )
    .await?;
    element
        .type_str(text)
        .await
        .with_context(|| format!("Failed to type into {selector}"))?;
    Ok(())
}
