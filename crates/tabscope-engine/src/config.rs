use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

/// Engine settings, fixed for the lifetime of a monitoring session.
/// Assembled from CLI flags by the binary; serde derives let a
/// front-end feed it from JSON instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory the dump artifacts are written into (overwritten on
    /// each dump).
    pub output_dir: PathBuf,
    /// Regex denylist matched against request URLs and console text.
    /// Matching events never enter the buffer.
    pub denylist: Vec<String>,
    /// Byte ceiling for captured request/response bodies; larger
    /// bodies are truncated with a marker.
    pub body_ceiling: usize,
    /// How long a request may stay pending before the sweep marks it
    /// incomplete.
    pub pending_timeout_ms: u64,
    /// Per-query bound on the dump-time fresh queries (cookies, DOM,
    /// screenshot).
    pub fresh_query_timeout_ms: u64,
    /// Optional hard wall-clock limit on the whole session. When it
    /// fires the controller attempts one final dump and disconnects.
    pub hard_timeout_secs: Option<u64>,
    /// Capacity of the instrumentation event channel; events beyond it
    /// are dropped and counted.
    pub event_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("tabscope-dump"),
            denylist: default_denylist(),
            body_ceiling: 64 * 1024,
            pending_timeout_ms: 30_000,
            fresh_query_timeout_ms: 5_000,
            hard_timeout_secs: None,
            event_capacity: 1024,
        }
    }
}

/// Dev-server housekeeping traffic that is never worth capturing:
/// hot-reload pings and keep-alive polling.
fn default_denylist() -> Vec<String> {
    vec![
        r"/sockjs-node/".to_string(),
        r"__webpack_hmr".to_string(),
        r"/@vite/client".to_string(),
        r"\[vite\]".to_string(),
        r"\[webpack-dev-server\]".to_string(),
        r"/browser-sync/".to_string(),
    ]
}

impl CaptureConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    pub fn fresh_query_timeout(&self) -> Duration {
        Duration::from_millis(self.fresh_query_timeout_ms)
    }

    pub fn hard_timeout(&self) -> Option<Duration> {
        self.hard_timeout_secs.map(Duration::from_secs)
    }

    /// Compile the denylist once at session start. Patterns are static
    /// per session, so a bad one is a startup error, not a runtime one.
    pub fn compile_denylist(&self) -> Result<Vec<Regex>, regex::Error> {
        self.denylist.iter().map(|p| Regex::new(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_denylist_compiles() {
        let cfg = CaptureConfig::default();
        let compiled = cfg.compile_denylist().unwrap();
        assert_eq!(compiled.len(), cfg.denylist.len());
        assert!(compiled.iter().any(|r| r.is_match("[vite] hot updated: /src/App.vue")));
    }

    #[test]
    fn bad_pattern_is_a_startup_error() {
        let cfg = CaptureConfig {
            denylist: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(cfg.compile_denylist().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: CaptureConfig = serde_json::from_str(r#"{ "body_ceiling": 1024 }"#).unwrap();
        assert_eq!(cfg.body_ceiling, 1024);
        assert_eq!(cfg.event_capacity, 1024);
        assert!(cfg.hard_timeout().is_none());
    }
}
