use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Severity of a captured console entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
    /// Anything the instrumentation layer reports that we do not map
    /// explicitly (trace, table, group markers, ...).
    Other(String),
}

impl ConsoleLevel {
    /// Map a raw instrumentation level string to a canonical level.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "log" => ConsoleLevel::Log,
            "debug" | "verbose" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "warn" | "warning" => ConsoleLevel::Warn,
            "error" | "assert" => ConsoleLevel::Error,
            other => ConsoleLevel::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleLevel::Log => write!(f, "log"),
            ConsoleLevel::Debug => write!(f, "debug"),
            ConsoleLevel::Info => write!(f, "info"),
            ConsoleLevel::Warn => write!(f, "warn"),
            ConsoleLevel::Error => write!(f, "error"),
            ConsoleLevel::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One console message, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    pub text: String,
    /// Script location of the call site (url:line), when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A captured request or response body. Bodies above the configured
/// ceiling are cut at a char boundary and flagged, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyCapture {
    pub data: String,
    pub truncated: bool,
}

impl BodyCapture {
    pub fn capture(data: String, ceiling: usize) -> Self {
        if data.len() <= ceiling {
            return Self {
                data,
                truncated: false,
            };
        }
        let mut end = ceiling;
        while !data.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            data: data[..end].to_string(),
            truncated: true,
        }
    }
}

/// Lifecycle state of a tracked network request.
///
/// `Completed` and `Failed` are terminal. `Incomplete` is the
/// terminal-for-reporting state used for requests that never resolved
/// within the response window (or were still pending at dump time); a
/// late event may still upgrade it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Completed { http_status: u16 },
    Failed { reason: String },
    Incomplete,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed { .. } | RequestStatus::Failed { .. }
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Completed { http_status } => write!(f, "{}", http_status),
            RequestStatus::Failed { reason } => write!(f, "failed: {}", reason),
            RequestStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// The composite record for one network request, assembled across its
/// lifecycle events by the correlator. Owned by the log buffer; not
/// mutated after the status becomes terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequestRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    pub request_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodyCapture>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<BodyCapture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the buffer, taken at dump time. Console
/// entries are re-pointed (shared immutable records), request records
/// are materialized copies; nothing here aliases the live stores.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    pub taken_at: DateTime<Utc>,
    pub console: Vec<Arc<ConsoleEntry>>,
    pub requests: Vec<NetworkRequestRecord>,
}

/// Cheap-to-produce counters for the status surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub console_entries: usize,
    pub requests_total: usize,
    pub requests_pending: usize,
    pub distinct_hosts: usize,
    pub dropped_events: u64,
    pub paused: bool,
}

/// One user-visible browser tab. Indices are 1-based and only valid
/// against the tab list they were returned with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// Cookie as reported by the browser session (http-only included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<f64>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
}

/// Artifacts a dump attempts to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Console,
    Network,
    RequestDetails,
    Cookies,
    Dom,
    Screenshot,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::Console => "console",
            ArtifactKind::Network => "network",
            ArtifactKind::RequestDetails => "request_details",
            ArtifactKind::Cookies => "cookies",
            ArtifactKind::Dom => "dom",
            ArtifactKind::Screenshot => "screenshot",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Written,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub artifact: ArtifactKind,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

/// What a dump actually produced. A dump never raises; partial failures
/// show up here as skipped artifacts with a reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpReport {
    pub output_dir: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub console_entries: usize,
    pub requests: usize,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl DumpReport {
    pub fn skipped(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.status, ArtifactStatus::Skipped { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.skipped().next().is_none()
    }
}

/// Raw instrumentation events as delivered by the browser session,
/// before normalization. The shapes are already coerced at the
/// session boundary; anything malformed is dropped there.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Console {
        level: String,
        text: String,
        source: Option<String>,
    },
    /// The page cleared its console (`console.clear()` or equivalent).
    ConsoleCleared,
    RequestWillBeSent {
        id: String,
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
    },
    ResponseReceived {
        id: String,
        http_status: u16,
        headers: BTreeMap<String, String>,
        mime_type: Option<String>,
    },
    LoadingFinished {
        id: String,
        body: Option<String>,
    },
    LoadingFailed {
        id: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parse_maps_aliases() {
        assert_eq!(ConsoleLevel::parse("warning"), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::parse("verbose"), ConsoleLevel::Debug);
        assert_eq!(
            ConsoleLevel::parse("table"),
            ConsoleLevel::Other("table".into())
        );
    }

    #[test]
    fn body_capture_truncates_at_char_boundary() {
        let body = BodyCapture::capture("héllo".to_string(), 2);
        // 'é' is two bytes starting at index 1; the cut falls back to 1.
        assert_eq!(body.data, "h");
        assert!(body.truncated);

        let whole = BodyCapture::capture("héllo".to_string(), 64);
        assert_eq!(whole.data, "héllo");
        assert!(!whole.truncated);
    }

    #[test]
    fn terminal_states() {
        assert!(
            RequestStatus::Completed { http_status: 200 }.is_terminal()
        );
        assert!(
            RequestStatus::Failed {
                reason: "net::ERR_ABORTED".into()
            }
            .is_terminal()
        );
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Incomplete.is_terminal());
    }

    #[test]
    fn request_status_serializes_tagged() {
        let v = serde_json::to_value(RequestStatus::Completed { http_status: 404 }).unwrap();
        assert_eq!(v["state"], "completed");
        assert_eq!(v["http_status"], 404);
    }
}
