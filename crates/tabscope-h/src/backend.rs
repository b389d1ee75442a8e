use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, Headers,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, RemoteObject,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use tabscope_common::error::SessionError;
use tabscope_common::protocol::{Cookie, RawEvent, TabInfo};
use tabscope_engine::backend::{BrowserSession, EventFeed};

/// `BrowserSession` over a live Chromium instance. Instrumentation
/// events from the bound page are coerced into `RawEvent`s at this
/// boundary and pushed through the feed; anything malformed is dropped
/// here, never forwarded.
pub struct CdpSession {
    client: CdpClient,
    feed: Option<EventFeed>,
    listeners: Vec<JoinHandle<()>>,
}

impl CdpSession {
    pub async fn launch(visible: bool) -> Result<Self, SessionError> {
        let client = CdpClient::launch(visible)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        Ok(Self {
            client,
            feed: None,
            listeners: Vec::new(),
        })
    }

    pub async fn connect(ws_url: &str) -> Result<Self, SessionError> {
        let client = CdpClient::connect(ws_url)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        Ok(Self {
            client,
            feed: None,
            listeners: Vec::new(),
        })
    }

    /// Navigate the monitored page. Used by the CLI before monitoring
    /// starts; not part of the engine seam.
    pub async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.client
            .page
            .goto(url)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        Ok(())
    }

    async fn visible_pages(&self) -> Result<Vec<(Page, TabInfo)>, SessionError> {
        let pages = self
            .client
            .browser
            .pages()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;

        let mut tabs = Vec::new();
        for page in pages {
            let url = page.url().await.unwrap_or_default().unwrap_or_default();
            if url.starts_with("devtools://") || url.starts_with("chrome-extension://") {
                continue;
            }
            let title = page
                .get_title()
                .await
                .unwrap_or_default()
                .unwrap_or_default();
            let index = tabs.len() + 1;
            tabs.push((page, TabInfo { index, title, url }));
        }
        Ok(tabs)
    }

    /// Attach console and network listeners for the current page,
    /// replacing any listeners bound to a previous tab.
    async fn attach_listeners(&mut self) -> Result<(), SessionError> {
        let Some(feed) = self.feed.clone() else {
            return Ok(());
        };
        for task in self.listeners.drain(..) {
            task.abort();
        }

        let page = self.client.page.clone();
        page.execute(EnableParams::default())
            .await
            .map_err(|e| SessionError::Browser(format!("enable network domain: {}", e)))?;

        self.listeners.push(spawn_console_listener(&page, feed.clone()).await?);
        self.listeners.push(spawn_request_listener(&page, feed.clone()).await?);
        self.listeners.push(spawn_response_listener(&page, feed.clone()).await?);
        self.listeners.push(spawn_finished_listener(&page, feed.clone()).await?);
        self.listeners.push(spawn_failed_listener(&page, feed).await?);
        debug!("instrumentation listeners attached");
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn subscribe_events(&mut self, feed: EventFeed) -> Result<(), SessionError> {
        self.feed = Some(feed);
        self.attach_listeners().await
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, SessionError> {
        Ok(self
            .visible_pages()
            .await?
            .into_iter()
            .map(|(_, tab)| tab)
            .collect())
    }

    async fn bind_tab(&mut self, index: usize) -> Result<TabInfo, SessionError> {
        let mut tabs = self.visible_pages().await?;
        if index == 0 || index > tabs.len() {
            return Err(SessionError::InvalidTab {
                index,
                available: tabs.len(),
            });
        }
        let (page, tab) = tabs.swap_remove(index - 1);
        info!(index, url = %tab.url, "binding to tab");
        self.client.page = page;
        self.attach_listeners().await?;
        Ok(tab)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError> {
        let cookies = self
            .client
            .page
            .get_cookies()
            .await
            .map_err(|e| SessionError::Browser(format!("get cookies failed: {}", e)))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: Some(c.expires),
                http_only: Some(c.http_only),
                secure: Some(c.secure),
            })
            .collect())
    }

    async fn document_html(&self) -> Result<String, SessionError> {
        self.client
            .page
            .content()
            .await
            .map_err(|e| SessionError::Browser(format!("get document failed: {}", e)))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.client
            .page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| SessionError::Browser(format!("screenshot failed: {}", e)))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        for task in self.listeners.drain(..) {
            task.abort();
        }
        self.client
            .shutdown()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        Ok(())
    }
}

async fn spawn_console_listener(
    page: &Page,
    feed: EventFeed,
) -> Result<JoinHandle<()>, SessionError> {
    let mut events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| SessionError::Browser(format!("subscribe console events: {}", e)))?;

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if matches!(event.r#type, ConsoleApiCalledType::Clear) {
                feed.emit(RawEvent::ConsoleCleared);
                continue;
            }
            feed.emit(RawEvent::Console {
                level: console_level(&event.r#type),
                text: console_text(&event.args),
                source: console_source(&event),
            });
        }
    }))
}

async fn spawn_request_listener(
    page: &Page,
    feed: EventFeed,
) -> Result<JoinHandle<()>, SessionError> {
    let mut events = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| SessionError::Browser(format!("subscribe request events: {}", e)))?;

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            feed.emit(RawEvent::RequestWillBeSent {
                id: event.request_id.inner().clone(),
                url: event.request.url.clone(),
                method: event.request.method.clone(),
                headers: headers_to_map(&event.request.headers),
                body: event.request.post_data.clone(),
            });
        }
    }))
}

async fn spawn_response_listener(
    page: &Page,
    feed: EventFeed,
) -> Result<JoinHandle<()>, SessionError> {
    let mut events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| SessionError::Browser(format!("subscribe response events: {}", e)))?;

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            feed.emit(RawEvent::ResponseReceived {
                id: event.request_id.inner().clone(),
                http_status: coerce_status(event.response.status),
                headers: headers_to_map(&event.response.headers),
                mime_type: Some(event.response.mime_type.clone()),
            });
        }
    }))
}

async fn spawn_finished_listener(
    page: &Page,
    feed: EventFeed,
) -> Result<JoinHandle<()>, SessionError> {
    let mut events = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| SessionError::Browser(format!("subscribe loading events: {}", e)))?;

    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let id = event.request_id.inner().clone();
            let body = fetch_body(&page, event.request_id.clone()).await;
            feed.emit(RawEvent::LoadingFinished { id, body });
        }
    }))
}

async fn spawn_failed_listener(
    page: &Page,
    feed: EventFeed,
) -> Result<JoinHandle<()>, SessionError> {
    let mut events = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(|e| SessionError::Browser(format!("subscribe failure events: {}", e)))?;

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            feed.emit(RawEvent::LoadingFailed {
                id: event.request_id.inner().clone(),
                reason: event.error_text.clone(),
            });
        }
    }))
}

/// Pull the response body once loading finished. Not every resource
/// has a retrievable body (cached, streamed, or evicted ones do not);
/// those come back as `None` rather than an error.
async fn fetch_body(
    page: &Page,
    request_id: chromiumoxide::cdp::browser_protocol::network::RequestId,
) -> Option<String> {
    match page.execute(GetResponseBodyParams::new(request_id)).await {
        Ok(response) => {
            let returns = &response.result;
            if returns.base64_encoded {
                match base64::engine::general_purpose::STANDARD.decode(&returns.body) {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => {
                        warn!("failed to decode response body: {}", e);
                        None
                    }
                }
            } else {
                Some(returns.body.clone())
            }
        }
        Err(e) => {
            debug!("response body not retrievable: {}", e);
            None
        }
    }
}

/// The wire reports the HTTP status as a wide integer; anything outside
/// the status-code range is coerced to 0 rather than truncated.
fn coerce_status(raw: i64) -> u16 {
    u16::try_from(raw).unwrap_or_default()
}

fn console_level(kind: &ConsoleApiCalledType) -> String {
    match kind {
        ConsoleApiCalledType::Log => "log".to_string(),
        ConsoleApiCalledType::Debug => "debug".to_string(),
        ConsoleApiCalledType::Info => "info".to_string(),
        ConsoleApiCalledType::Error => "error".to_string(),
        ConsoleApiCalledType::Warning => "warning".to_string(),
        ConsoleApiCalledType::Assert => "assert".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

fn console_text(args: &[RemoteObject]) -> String {
    args.iter()
        .map(|arg| match (&arg.value, &arg.description) {
            (Some(serde_json::Value::String(s)), _) => s.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(description)) => description.clone(),
            (None, None) => "undefined".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_source(event: &EventConsoleApiCalled) -> Option<String> {
    let frame = event.stack_trace.as_ref()?.call_frames.first()?;
    if frame.url.is_empty() {
        return None;
    }
    Some(format!("{}:{}", frame.url, frame.line_number + 1))
}

fn headers_to_map(headers: &Headers) -> BTreeMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_status_coerces_to_zero() {
        assert_eq!(coerce_status(200), 200);
        assert_eq!(coerce_status(599), 599);
        assert_eq!(coerce_status(-1), 0);
        assert_eq!(coerce_status(i64::from(u16::MAX) + 1), 0);
    }
}
