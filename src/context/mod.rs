//! The live automated page, as seen by the orchestration core.
//!
//! Everything the core needs from the browser driver goes through
//! [`LiveContext`]: authentication artifacts for session capture and restore,
//! plus the handful of element probes and pointer gestures the verification
//! state machine uses. The driver itself (navigation, DOM heuristics) stays
//! behind this seam.

pub mod memory;

pub use memory::MemoryContext;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A browser cookie as captured from, and restored into, the live context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Expiry as Unix seconds. `None` = session cookie (persisted anyway).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// "Strict", "Lax" or "None".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Element geometry in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }
}

/// Storage area keyed by entry name; ordered for stable serialization.
pub type StorageMap = BTreeMap<String, String>;

/// `scheme://host[:port]` of an http(s) URL. `None` for anything else,
/// including `about:blank`.
pub fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    Some(format!("{}://{authority}", scheme.to_ascii_lowercase()))
}

#[async_trait]
pub trait LiveContext: Send + Sync {
    /// URL of the current document.
    async fn current_url(&self) -> anyhow::Result<String>;
    /// Navigate to `url` and wait for the document to load. Storage access is
    /// scoped to the document's origin, so this precedes storage writes.
    async fn open(&self, url: &str) -> anyhow::Result<()>;

    async fn cookies(&self) -> anyhow::Result<Vec<Cookie>>;
    async fn set_cookies(&self, cookies: &[Cookie]) -> anyhow::Result<()>;

    async fn local_storage(&self) -> anyhow::Result<StorageMap>;
    /// Replace the origin's local storage with `entries`.
    async fn set_local_storage(&self, entries: &StorageMap) -> anyhow::Result<()>;

    async fn session_storage(&self) -> anyhow::Result<StorageMap>;
    /// Replace the origin's session storage with `entries`.
    async fn set_session_storage(&self, entries: &StorageMap) -> anyhow::Result<()>;

    async fn user_agent(&self) -> anyhow::Result<String>;
    async fn set_user_agent(&self, user_agent: &str) -> anyhow::Result<()>;

    async fn viewport(&self) -> anyhow::Result<Viewport>;
    async fn set_viewport(&self, viewport: Viewport) -> anyhow::Result<()>;

    async fn has_element(&self, selector: &str) -> anyhow::Result<bool>;
    /// Clear the first element matching `selector` and type `text` into it.
    /// Returns `false` when nothing matches.
    async fn type_into(&self, selector: &str, text: &str) -> anyhow::Result<bool>;
    /// Click the first button whose text contains any of `labels`
    /// (case-insensitive). Returns `false` when no button matches.
    async fn click_button_labelled(&self, labels: &[String]) -> anyhow::Result<bool>;
    async fn bounding_box(&self, selector: &str) -> anyhow::Result<Option<BoundingBox>>;

    async fn mouse_down(&self, at: Point) -> anyhow::Result<()>;
    async fn mouse_move(&self, to: Point) -> anyhow::Result<()>;
    async fn mouse_up(&self, at: Point) -> anyhow::Result<()>;

    /// Wait up to `timeout` for a navigation. `Ok(false)` on timeout.
    async fn wait_for_navigation(&self, timeout: Duration) -> anyhow::Result<bool>;
}
