use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use tabscope_common::protocol::{BodyCapture, NetworkRequestRecord, RequestStatus};

/// Tracks network requests by id across their lifecycle, assembling one
/// composite record per request in first-seen order.
///
/// Transitions into a terminal state (`Completed`/`Failed`) are one-way
/// and idempotent: duplicate or conflicting terminal events are logged
/// and discarded, first event wins. Requests pending longer than the
/// response window are swept to `Incomplete`; a late terminal event may
/// still upgrade such a record.
pub struct RequestCorrelator {
    records: Vec<NetworkRequestRecord>,
    index: HashMap<String, usize>,
    body_ceiling: usize,
    pending_timeout: chrono::Duration,
}

impl RequestCorrelator {
    pub fn new(body_ceiling: usize, pending_timeout: Duration) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            body_ceiling,
            pending_timeout: chrono::Duration::from_std(pending_timeout)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Whether `id` is already tracked. Lifecycle events for tracked
    /// ids are processed even while collection is paused.
    pub fn is_tracked(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn on_request(
        &mut self,
        id: String,
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(&i) = self.index.get(&id) {
            let record = &mut self.records[i];
            if record.status == RequestStatus::Pending {
                // Redirect hop: same id, new destination.
                debug!(id = %id, url = %url, "request redirected");
                record.url = url;
                record.request_headers = headers;
                return;
            }
            debug!(id = %id, "duplicate request event for settled id, ignoring");
            return;
        }

        let record = NetworkRequestRecord {
            id: id.clone(),
            url,
            method,
            request_headers: headers,
            request_body: body.map(|b| BodyCapture::capture(b, self.body_ceiling)),
            status: RequestStatus::Pending,
            response_headers: None,
            response_body: None,
            mime_type: None,
            started_at: now,
            finished_at: None,
        };
        self.index.insert(id, self.records.len());
        self.records.push(record);
    }

    pub fn on_response(
        &mut self,
        id: &str,
        http_status: u16,
        headers: BTreeMap<String, String>,
        mime_type: Option<String>,
        now: DateTime<Utc>,
    ) {
        let Some(record) = self.get_mut(id) else {
            debug!(id = %id, "response for unknown request id, ignoring");
            return;
        };
        match &record.status {
            RequestStatus::Pending => {}
            RequestStatus::Incomplete => {
                debug!(id = %id, "late response upgrades incomplete request");
            }
            terminal => {
                debug!(id = %id, status = %terminal, "duplicate terminal event, ignoring");
                return;
            }
        }
        record.status = RequestStatus::Completed { http_status };
        record.response_headers = Some(headers);
        record.mime_type = mime_type;
        record.finished_at = Some(now);
    }

    /// Attach the response body once loading finished. Body retrieval
    /// trails the response event; attaching it does not move the state
    /// machine.
    pub fn on_finished(&mut self, id: &str, body: Option<String>) {
        let ceiling = self.body_ceiling;
        let Some(record) = self.get_mut(id) else {
            debug!(id = %id, "loading finished for unknown request id, ignoring");
            return;
        };
        if matches!(record.status, RequestStatus::Failed { .. }) {
            return;
        }
        if record.response_body.is_none() {
            record.response_body = body.map(|b| BodyCapture::capture(b, ceiling));
        }
    }

    pub fn on_failed(&mut self, id: &str, reason: String, now: DateTime<Utc>) {
        let Some(record) = self.get_mut(id) else {
            debug!(id = %id, "failure for unknown request id, ignoring");
            return;
        };
        match &record.status {
            RequestStatus::Pending => {}
            RequestStatus::Incomplete => {
                debug!(id = %id, "late failure upgrades incomplete request");
            }
            terminal => {
                debug!(id = %id, status = %terminal, "duplicate terminal event, ignoring");
                return;
            }
        }
        record.status = RequestStatus::Failed { reason };
        record.finished_at = Some(now);
    }

    /// Mark requests pending longer than the response window as
    /// incomplete so nothing stays `Pending` indefinitely. Returns the
    /// number of records swept.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let deadline = self.pending_timeout;
        let mut swept = 0;
        for record in &mut self.records {
            if record.status == RequestStatus::Pending && now - record.started_at > deadline {
                debug!(id = %record.id, "response window elapsed, marking incomplete");
                record.status = RequestStatus::Incomplete;
                swept += 1;
            }
        }
        swept
    }

    /// Point-in-time copies of all records in first-seen order. Any
    /// record still pending is materialized as `Incomplete` in the copy
    /// only; the live record keeps waiting.
    pub fn materialize(&self) -> Vec<NetworkRequestRecord> {
        self.records
            .iter()
            .map(|r| {
                let mut copy = r.clone();
                if copy.status == RequestStatus::Pending {
                    copy.status = RequestStatus::Incomplete;
                }
                copy
            })
            .collect()
    }

    /// Drop settled records but keep in-flight ones: a request started
    /// before the clear still resolves and lands in the next snapshot.
    pub fn clear(&mut self) {
        self.records.retain(|r| r.status == RequestStatus::Pending);
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .count()
    }

    pub fn records(&self) -> &[NetworkRequestRecord] {
        &self.records
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut NetworkRequestRecord> {
        self.index.get(id).map(|&i| &mut self.records[i])
    }
}
