use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::correlator::RequestCorrelator;
use tabscope_common::protocol::{BufferSnapshot, BufferStats, ConsoleEntry};

/// The append-only in-memory store for normalized console lines and
/// correlated request records. Owns pause and clear semantics.
///
/// Console entries are held behind `Arc` so `snapshot()` re-points the
/// container without copying entry contents; records are immutable once
/// appended, so a snapshot can never observe a torn write.
pub struct LogBuffer {
    console: Vec<Arc<ConsoleEntry>>,
    requests: RequestCorrelator,
    paused: bool,
    dropped: Arc<AtomicU64>,
}

impl LogBuffer {
    pub fn new(
        body_ceiling: usize,
        pending_timeout: Duration,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            console: Vec::new(),
            requests: RequestCorrelator::new(body_ceiling, pending_timeout),
            paused: false,
            dropped,
        }
    }

    /// Append a console entry. No-op while paused.
    pub fn push_console(&mut self, entry: ConsoleEntry) {
        if self.paused {
            return;
        }
        self.console.push(Arc::new(entry));
    }

    /// Begin tracking a request. New requests are ignored while paused;
    /// redirect hops for an already-tracked id are not.
    pub fn on_request(
        &mut self,
        id: String,
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        now: DateTime<Utc>,
    ) {
        if self.paused && !self.requests.is_tracked(&id) {
            return;
        }
        self.requests.on_request(id, url, method, headers, body, now);
    }

    /// Lifecycle events for tracked ids are recorded even while paused:
    /// an in-flight request started before the pause completes normally.
    pub fn on_response(
        &mut self,
        id: &str,
        http_status: u16,
        headers: BTreeMap<String, String>,
        mime_type: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.requests.on_response(id, http_status, headers, mime_type, now);
    }

    pub fn on_finished(&mut self, id: &str, body: Option<String>) {
        self.requests.on_finished(id, body);
    }

    pub fn on_failed(&mut self, id: &str, reason: String, now: DateTime<Utc>) {
        self.requests.on_failed(id, reason, now);
    }

    /// Empty the console store and drop settled request records.
    /// In-flight requests stay tracked and resolve into the next
    /// snapshot; clearing is "ignore history", not "abort network".
    pub fn clear(&mut self) {
        debug!(
            console = self.console.len(),
            requests = self.requests.len(),
            "clearing buffer"
        );
        self.console.clear();
        self.requests.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.requests.sweep(now)
    }

    /// Counts only; cheap enough to poll from the status endpoint.
    pub fn stats(&self) -> BufferStats {
        let distinct_hosts = self
            .requests
            .records()
            .iter()
            .filter_map(|r| Url::parse(&r.url).ok())
            .filter_map(|u| u.host_str().map(|h| h.to_string()))
            .collect::<HashSet<_>>()
            .len();
        BufferStats {
            console_entries: self.console.len(),
            requests_total: self.requests.len(),
            requests_pending: self.requests.pending_count(),
            distinct_hosts,
            dropped_events: self.dropped.load(Ordering::Relaxed),
            paused: self.paused,
        }
    }

    /// Point-in-time copy: the console container is re-pointed, request
    /// records are materialized (pending ones as `Incomplete`). Later
    /// appends and clears do not affect the returned snapshot.
    pub fn snapshot(&self, now: DateTime<Utc>) -> BufferSnapshot {
        BufferSnapshot {
            taken_at: now,
            console: self.console.clone(),
            requests: self.requests.materialize(),
        }
    }
}
