use std::collections::HashSet;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, trace};

use crate::buffer::LogBuffer;
use tabscope_common::protocol::{ConsoleEntry, ConsoleLevel, RawEvent};

/// What the normalizer did with a raw event. Mostly for tests and
/// trace logging; callers do not branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Entered the buffer (or was handed to the correlator).
    Recorded,
    /// Matched the denylist, or belongs to a denylisted request.
    Filtered,
    /// Console-clear signal; the buffer was cleared instead.
    Cleared,
}

/// Denylisted connections that never terminate (hot-reload event
/// streams, websocket upgrades) would otherwise pin their id forever;
/// past this size the set is reset and stale ids fall back to the
/// unknown-id path, which is logged and ignored.
const DENIED_IDS_CAP: usize = 1024;

/// Converts raw instrumentation events into canonical records and
/// applies the static per-session noise filters before anything reaches
/// correlation, so denylisted traffic never pollutes overview counts.
pub struct EventNormalizer {
    denylist: Vec<Regex>,
    /// Ids of denylisted requests; their later lifecycle events are
    /// swallowed silently instead of logging unknown-id anomalies.
    denied_ids: HashSet<String>,
}

impl EventNormalizer {
    pub fn new(denylist: Vec<Regex>) -> Self {
        Self {
            denylist,
            denied_ids: HashSet::new(),
        }
    }

    fn denied(&self, text: &str) -> bool {
        self.denylist.iter().any(|re| re.is_match(text))
    }

    /// Normalize one event into the buffer. Never blocks and never
    /// fails; anything that cannot be recorded is dropped with a trace.
    pub fn apply(&mut self, event: RawEvent, buffer: &mut LogBuffer) -> Disposition {
        match event {
            RawEvent::Console {
                level,
                text,
                source,
            } => {
                if self.denied(&text) {
                    trace!(text = %text, "console entry filtered");
                    return Disposition::Filtered;
                }
                buffer.push_console(ConsoleEntry {
                    timestamp: Utc::now(),
                    level: ConsoleLevel::parse(&level),
                    text,
                    source,
                });
                Disposition::Recorded
            }
            RawEvent::ConsoleCleared => {
                debug!("page cleared its console, clearing buffer");
                buffer.clear();
                Disposition::Cleared
            }
            RawEvent::RequestWillBeSent {
                id,
                url,
                method,
                headers,
                body,
            } => {
                if self.denied(&url) {
                    trace!(url = %url, "request filtered");
                    if self.denied_ids.len() >= DENIED_IDS_CAP {
                        debug!("denied-id set full, resetting");
                        self.denied_ids.clear();
                    }
                    self.denied_ids.insert(id);
                    return Disposition::Filtered;
                }
                buffer.on_request(id, url, method, headers, body, Utc::now());
                Disposition::Recorded
            }
            RawEvent::ResponseReceived {
                id,
                http_status,
                headers,
                mime_type,
            } => {
                if self.denied_ids.contains(&id) {
                    return Disposition::Filtered;
                }
                buffer.on_response(&id, http_status, headers, mime_type, Utc::now());
                Disposition::Recorded
            }
            RawEvent::LoadingFinished { id, body } => {
                if self.denied_ids.remove(&id) {
                    return Disposition::Filtered;
                }
                buffer.on_finished(&id, body);
                Disposition::Recorded
            }
            RawEvent::LoadingFailed { id, reason } => {
                if self.denied_ids.remove(&id) {
                    return Disposition::Filtered;
                }
                buffer.on_failed(&id, reason, Utc::now());
                Disposition::Recorded
            }
        }
    }
}
