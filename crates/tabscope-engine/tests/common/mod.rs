#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tabscope_engine::SessionError;
use tabscope_engine::backend::{BrowserSession, EventFeed};
use tabscope_engine::protocol::{Cookie, TabInfo};

/// Canned browser session, in the spirit of the engine's real CDP
/// implementation but fully scripted.
pub struct MockSession {
    pub tabs: Vec<TabInfo>,
    pub cookies: Vec<Cookie>,
    pub dom: Result<String, String>,
    pub screenshot: Result<Vec<u8>, String>,
    /// Artificial latency for the DOM query, to widen the dump window.
    pub dom_delay: Option<Duration>,
    /// The feed handed over by the controller; tests emit through it.
    pub feed: Arc<Mutex<Option<EventFeed>>>,
    /// Last index passed to `bind_tab`.
    pub bound: Arc<Mutex<Option<usize>>>,
}

pub fn tab(index: usize, title: &str, url: &str) -> TabInfo {
    TabInfo {
        index,
        title: title.to_string(),
        url: url.to_string(),
    }
}

pub fn cookie(name: &str, value: &str, domain: &str) -> Cookie {
    Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: Some(domain.to_string()),
        path: Some("/".to_string()),
        expires: None,
        http_only: Some(name.starts_with("session")),
        secure: Some(false),
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self {
            tabs: vec![tab(1, "Example", "https://example.com/")],
            cookies: vec![
                cookie("session_id", "abc123", ".example.com"),
                cookie("theme", "dark", "example.com"),
                cookie("tracker", "xyz", "cdn.other.net"),
            ],
            dom: Ok("<html><body>hello</body></html>".to_string()),
            screenshot: Ok(vec![0x89, b'P', b'N', b'G']),
            dom_delay: None,
            feed: Arc::new(Mutex::new(None)),
            bound: Arc::new(Mutex::new(None)),
        }
    }
}

impl MockSession {
    /// Shared handles for asserting on (and emitting through) the
    /// session after it has been boxed into the controller.
    pub fn probes(&self) -> (Arc<Mutex<Option<EventFeed>>>, Arc<Mutex<Option<usize>>>) {
        (self.feed.clone(), self.bound.clone())
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn subscribe_events(&mut self, feed: EventFeed) -> Result<(), SessionError> {
        *self.feed.lock().unwrap() = Some(feed);
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, SessionError> {
        Ok(self.tabs.clone())
    }

    async fn bind_tab(&mut self, index: usize) -> Result<TabInfo, SessionError> {
        if index == 0 || index > self.tabs.len() {
            return Err(SessionError::InvalidTab {
                index,
                available: self.tabs.len(),
            });
        }
        *self.bound.lock().unwrap() = Some(index);
        Ok(self.tabs[index - 1].clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError> {
        Ok(self.cookies.clone())
    }

    async fn document_html(&self) -> Result<String, SessionError> {
        if let Some(delay) = self.dom_delay {
            tokio::time::sleep(delay).await;
        }
        self.dom.clone().map_err(SessionError::Browser)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.screenshot.clone().map_err(SessionError::Browser)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}
