use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use tabscope_common::error::SessionError;
use tabscope_common::protocol::{Cookie, RawEvent, TabInfo};

/// Producer side of the instrumentation feed. Cloned into every
/// listener task the session spawns. Emitting never blocks the event
/// source: a full channel drops the event and bumps the counter.
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::Sender<RawEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventFeed {
    pub fn new(tx: mpsc::Sender<RawEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }

    /// Create a feed together with its consumer end and drop counter.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RawEvent>, Arc<AtomicU64>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (Self::new(tx, dropped.clone()), rx, dropped)
    }

    pub fn emit(&self, event: RawEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("instrumentation event dropped: {}", e);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The seam to the browser collaborator. `tabscope-h` implements this
/// over CDP; tests implement it with canned data.
///
/// Fresh queries (`cookies`, `document_html`, `screenshot`, `list_tabs`)
/// take `&self` so a dump can run them concurrently.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Start streaming console and network lifecycle events for the
    /// currently bound tab into `feed`. Called once per session; a
    /// later `bind_tab` moves the stream to the new tab.
    async fn subscribe_events(&mut self, feed: EventFeed) -> Result<(), SessionError>;

    /// All user-visible tabs (devtools and extension pages excluded),
    /// with 1-based indices.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, SessionError>;

    /// Rebind event subscriptions to the tab at `index` (1-based,
    /// against the current `list_tabs` view).
    async fn bind_tab(&mut self, index: usize) -> Result<TabInfo, SessionError>;

    /// All cookies for the bound tab's session, http-only included.
    async fn cookies(&self) -> Result<Vec<Cookie>, SessionError>;

    /// Serialized document tree of the bound tab.
    async fn document_html(&self) -> Result<String, SessionError>;

    /// Current viewport raster (PNG bytes).
    async fn screenshot(&self) -> Result<Vec<u8>, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}
