use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, SetCookiesParams, SetUserAgentOverrideParams, TimeSinceEpoch,
};
use serde::Deserialize;
use std::time::Duration;

use super::{eval, js_literal};
use crate::context::{BoundingBox, Cookie, LiveContext, Point, StorageMap, Viewport};

#[derive(Clone)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn storage(&self, area: &str) -> Result<StorageMap> {
        eval(
            &self.page,
            format!("Object.fromEntries(Object.entries(window.{area}))"),
        )
        .await
    }

    async fn replace_storage(&self, area: &str, entries: &StorageMap) -> Result<()> {
        let _: bool = eval(
            &self.page,
            format!(
                "(() => {{ window.{area}.clear(); for (const [k, v] of Object.entries({})) window.{area}.setItem(k, v); return true; }})()",
                js_literal(entries)?
            ),
        )
        .await?;
        Ok(())
    }

    async fn mouse(&self, kind: DispatchMouseEventType, at: Point) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind.clone()).x(at.x).y(at.y);
        if !matches!(kind, DispatchMouseEventType::MouseMoved) {
            builder = builder.button(MouseButton::Left).click_count(1);
        }
        let params = builder.build().map_err(anyhow::Error::msg)?;
        self.page.execute(params).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[async_trait]
impl LiveContext for BrowserContext {
    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                // CDP reports session cookies with a negative expiry.
                expires: (c.expires >= 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| s.as_ref().to_string()),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param.expires = c.expires.map(TimeSinceEpoch::new);
                param.same_site = c
                    .same_site
                    .as_deref()
                    .and_then(|s| s.parse::<CookieSameSite>().ok());
                param
            })
            .collect();
        self.page.execute(SetCookiesParams::new(params)).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn open(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn local_storage(&self) -> Result<StorageMap> {
        self.storage("localStorage").await
    }

    async fn set_local_storage(&self, entries: &StorageMap) -> Result<()> {
        self.replace_storage("localStorage", entries).await
    }

    async fn session_storage(&self) -> Result<StorageMap> {
        self.storage("sessionStorage").await
    }

    async fn set_session_storage(&self, entries: &StorageMap) -> Result<()> {
        self.replace_storage("sessionStorage", entries).await
    }

    async fn user_agent(&self) -> Result<String> {
        eval(&self.page, "navigator.userAgent".to_string()).await
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await?;
        Ok(())
    }

    async fn viewport(&self) -> Result<Viewport> {
        eval(
            &self.page,
            "({ width: window.innerWidth, height: window.innerHeight })".to_string(),
        )
        .await
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                viewport.width as i64,
                viewport.height as i64,
                1.0,
                false,
            ))
            .await?;
        Ok(())
    }

    async fn has_element(&self, selector: &str) -> Result<bool> {
        super::element_exists(&self.page, selector).await
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<bool> {
        if !super::element_exists(&self.page, selector).await? {
            return Ok(false);
        }
        super::fill(&self.page, selector, text).await?;
        Ok(true)
    }

    async fn click_button_labelled(&self, labels: &[String]) -> Result<bool> {
        let labels: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
        eval(
            &self.page,
            format!(
                "(() => {{ const labels = {}; \
                 const button = Array.from(document.querySelectorAll('button')) \
                   .find(b => labels.some(l => (b.textContent || '').toLowerCase().includes(l))); \
                 if (!button) return false; button.click(); return true; }})()",
                js_literal(&labels)?
            ),
        )
        .await
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>> {
        let rect: Option<Rect> = eval(
            &self.page,
            format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return null; \
                 const r = el.getBoundingClientRect(); \
                 return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
                js_literal(selector)?
            ),
        )
        .await?;
        Ok(rect.map(|r| BoundingBox {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }))
    }

    async fn mouse_down(&self, at: Point) -> Result<()> {
        self.mouse(DispatchMouseEventType::MousePressed, at).await
    }

    async fn mouse_move(&self, to: Point) -> Result<()> {
        self.mouse(DispatchMouseEventType::MouseMoved, to).await
    }

    async fn mouse_up(&self, at: Point) -> Result<()> {
        self.mouse(DispatchMouseEventType::MouseReleased, at).await
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<bool> {
        super::wait_for_navigation(&self.page, timeout).await
    }
}
