//! Scriptable in-process [`LiveContext`].
//!
//! Backs the test suites. Elements are keyed by their exact
//! selector string; clicking a matching button or releasing the mouse can be
//! scripted to remove elements, which is how a challenge "goes away".

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{BoundingBox, Cookie, LiveContext, Point, StorageMap, Viewport};

/// One recorded pointer action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Down(Point),
    Move(Point),
    Up(Point),
}

#[derive(Default)]
struct MemoryState {
    url: String,
    cookies: Vec<Cookie>,
    local_storage: StorageMap,
    session_storage: StorageMap,
    user_agent: String,
    viewport: Viewport,
    elements: HashMap<String, Option<BoundingBox>>,
    buttons: Vec<String>,
    navigates_on_wait: bool,
    removed_on_click: Vec<String>,
    removed_on_release: Vec<String>,
    failing: HashSet<String>,
    calls: Vec<&'static str>,
    typed: Vec<(String, String)>,
    clicked: Vec<String>,
    gestures: Vec<Gesture>,
    opened: Vec<String>,
}

#[derive(Default)]
pub struct MemoryContext {
    state: Mutex<MemoryState>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and fail it if `operation` was scripted to fail.
    fn enter(&self, operation: &'static str) -> anyhow::Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        state.calls.push(operation);
        if state.failing.contains(operation) {
            anyhow::bail!("{operation} failed");
        }
        Ok(state)
    }

    pub fn add_element(&self, selector: impl Into<String>, bbox: Option<BoundingBox>) {
        self.lock().elements.insert(selector.into(), bbox);
    }

    pub fn remove_element(&self, selector: &str) {
        self.lock().elements.remove(selector);
    }

    pub fn add_button(&self, label: impl Into<String>) {
        self.lock().buttons.push(label.into());
    }

    /// Whether `wait_for_navigation` reports a navigation.
    pub fn set_navigates(&self, navigates: bool) {
        self.lock().navigates_on_wait = navigates;
    }

    /// Remove `selectors` once any button is clicked.
    pub fn clear_on_click<I, S>(&self, selectors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .removed_on_click
            .extend(selectors.into_iter().map(Into::into));
    }

    /// Remove `selectors` once the mouse button is released.
    pub fn clear_on_release<I, S>(&self, selectors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .removed_on_release
            .extend(selectors.into_iter().map(Into::into));
    }

    /// Make every call to `operation` (the trait method name) fail.
    pub fn fail_on(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string());
    }

    pub fn set_url_now(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    /// URLs passed to [`LiveContext::open`], in order.
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    pub fn set_user_agent_now(&self, user_agent: impl Into<String>) {
        self.lock().user_agent = user_agent.into();
    }

    pub fn push_cookie(&self, cookie: Cookie) {
        self.lock().cookies.push(cookie);
    }

    pub fn put_local(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().local_storage.insert(key.into(), value.into());
    }

    pub fn put_session(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().session_storage.insert(key.into(), value.into());
    }

    /// Trait methods invoked so far, in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.lock().typed.clone()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.lock().clicked.clone()
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.lock().gestures.clone()
    }

    pub fn snapshot_cookies(&self) -> Vec<Cookie> {
        self.lock().cookies.clone()
    }

    pub fn snapshot_local(&self) -> StorageMap {
        self.lock().local_storage.clone()
    }
}

#[async_trait]
impl LiveContext for MemoryContext {
    async fn current_url(&self) -> anyhow::Result<String> {
        Ok(self.enter("current_url")?.url.clone())
    }

    async fn open(&self, url: &str) -> anyhow::Result<()> {
        let mut state = self.enter("open")?;
        state.url = url.to_string();
        state.opened.push(url.to_string());
        Ok(())
    }

    async fn cookies(&self) -> anyhow::Result<Vec<Cookie>> {
        Ok(self.enter("cookies")?.cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> anyhow::Result<()> {
        let mut state = self.enter("set_cookies")?;
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn local_storage(&self) -> anyhow::Result<StorageMap> {
        Ok(self.enter("local_storage")?.local_storage.clone())
    }

    async fn set_local_storage(&self, entries: &StorageMap) -> anyhow::Result<()> {
        self.enter("set_local_storage")?.local_storage = entries.clone();
        Ok(())
    }

    async fn session_storage(&self) -> anyhow::Result<StorageMap> {
        Ok(self.enter("session_storage")?.session_storage.clone())
    }

    async fn set_session_storage(&self, entries: &StorageMap) -> anyhow::Result<()> {
        self.enter("set_session_storage")?.session_storage = entries.clone();
        Ok(())
    }

    async fn user_agent(&self) -> anyhow::Result<String> {
        Ok(self.enter("user_agent")?.user_agent.clone())
    }

    async fn set_user_agent(&self, user_agent: &str) -> anyhow::Result<()> {
        self.enter("set_user_agent")?.user_agent = user_agent.to_string();
        Ok(())
    }

    async fn viewport(&self) -> anyhow::Result<Viewport> {
        Ok(self.enter("viewport")?.viewport)
    }

    async fn set_viewport(&self, viewport: Viewport) -> anyhow::Result<()> {
        self.enter("set_viewport")?.viewport = viewport;
        Ok(())
    }

    async fn has_element(&self, selector: &str) -> anyhow::Result<bool> {
        Ok(self.enter("has_element")?.elements.contains_key(selector))
    }

    async fn type_into(&self, selector: &str, text: &str) -> anyhow::Result<bool> {
        let mut state = self.enter("type_into")?;
        if !state.elements.contains_key(selector) {
            return Ok(false);
        }
        state.typed.push((selector.to_string(), text.to_string()));
        Ok(true)
    }

    async fn click_button_labelled(&self, labels: &[String]) -> anyhow::Result<bool> {
        let mut state = self.enter("click_button_labelled")?;
        let hit = state.buttons.iter().find(|button| {
            let text = button.to_lowercase();
            labels.iter().any(|label| text.contains(&label.to_lowercase()))
        });
        let Some(button) = hit.cloned() else {
            return Ok(false);
        };
        state.clicked.push(button);
        for selector in std::mem::take(&mut state.removed_on_click) {
            state.elements.remove(&selector);
        }
        Ok(true)
    }

    async fn bounding_box(&self, selector: &str) -> anyhow::Result<Option<BoundingBox>> {
        Ok(self.enter("bounding_box")?.elements.get(selector).copied().flatten())
    }

    async fn mouse_down(&self, at: Point) -> anyhow::Result<()> {
        self.enter("mouse_down")?.gestures.push(Gesture::Down(at));
        Ok(())
    }

    async fn mouse_move(&self, to: Point) -> anyhow::Result<()> {
        self.enter("mouse_move")?.gestures.push(Gesture::Move(to));
        Ok(())
    }

    async fn mouse_up(&self, at: Point) -> anyhow::Result<()> {
        let mut state = self.enter("mouse_up")?;
        state.gestures.push(Gesture::Up(at));
        for selector in std::mem::take(&mut state.removed_on_release) {
            state.elements.remove(&selector);
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> anyhow::Result<bool> {
        let navigates = self.enter("wait_for_navigation")?.navigates_on_wait;
        if !navigates {
            tokio::time::sleep(timeout).await;
        }
        Ok(navigates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_are_recorded_and_raised() {
        let ctx = MemoryContext::new();
        ctx.fail_on("set_viewport");
        assert!(ctx.set_viewport(Viewport::default()).await.is_err());
        assert!(ctx.set_user_agent("ua").await.is_ok());
        assert_eq!(ctx.calls(), vec!["set_viewport", "set_user_agent"]);
    }

    #[tokio::test]
    async fn clicking_a_button_clears_scripted_elements() {
        let ctx = MemoryContext::new();
        ctx.add_element("#challenge", None);
        ctx.add_button("Verify now");
        ctx.clear_on_click(["#challenge"]);

        assert!(!ctx.click_button_labelled(&["submit".into()]).await.unwrap());
        assert!(ctx.has_element("#challenge").await.unwrap());
        assert!(ctx.click_button_labelled(&["VERIFY".into()]).await.unwrap());
        assert!(!ctx.has_element("#challenge").await.unwrap());
    }

    #[tokio::test]
    async fn set_cookies_replaces_matching_cookie() {
        let ctx = MemoryContext::new();
        ctx.push_cookie(Cookie::new("sid", "old", ".example.com"));
        ctx.set_cookies(&[Cookie::new("sid", "new", ".example.com")])
            .await
            .unwrap();
        let cookies = ctx.snapshot_cookies();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "new");
    }
}
