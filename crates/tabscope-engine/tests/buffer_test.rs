use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tabscope_engine::buffer::LogBuffer;
use tabscope_engine::protocol::{ConsoleEntry, ConsoleLevel, RequestStatus};

fn buffer() -> LogBuffer {
    LogBuffer::new(
        64 * 1024,
        Duration::from_secs(30),
        Arc::new(AtomicU64::new(0)),
    )
}

fn entry(text: &str) -> ConsoleEntry {
    ConsoleEntry {
        timestamp: Utc::now(),
        level: ConsoleLevel::Log,
        text: text.to_string(),
        source: None,
    }
}

fn texts(snapshot: &tabscope_engine::protocol::BufferSnapshot) -> Vec<&str> {
    snapshot.console.iter().map(|e| e.text.as_str()).collect()
}

#[test]
fn snapshot_contains_exactly_prior_entries_in_order() {
    let mut buf = buffer();
    for text in ["a", "b", "c"] {
        buf.push_console(entry(text));
    }

    let snapshot = buf.snapshot(Utc::now());
    buf.push_console(entry("d"));

    assert_eq!(texts(&snapshot), vec!["a", "b", "c"]);
    assert_eq!(buf.stats().console_entries, 4);
}

#[test]
fn snapshot_is_unaffected_by_later_clear() {
    let mut buf = buffer();
    buf.push_console(entry("a"));
    buf.push_console(entry("b"));

    let snapshot = buf.snapshot(Utc::now());
    buf.clear();

    assert_eq!(texts(&snapshot), vec!["a", "b"]);
    assert_eq!(buf.stats().console_entries, 0);
}

#[test]
fn paused_buffer_ignores_new_events_but_finishes_inflight_requests() {
    let mut buf = buffer();
    let now = Utc::now();
    buf.on_request(
        "r1".into(),
        "https://example.com/api".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );

    buf.pause();
    assert!(buf.is_paused());

    for _ in 0..3 {
        buf.push_console(entry("ignored"));
    }
    buf.on_request(
        "r2".into(),
        "https://example.com/late".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );
    // The request started before the pause still resolves.
    buf.on_response("r1", 200, BTreeMap::new(), None, now);

    buf.resume();
    let snapshot = buf.snapshot(Utc::now());
    assert!(snapshot.console.is_empty());
    assert_eq!(snapshot.requests.len(), 1);
    assert_eq!(
        snapshot.requests[0].status,
        RequestStatus::Completed { http_status: 200 }
    );
}

#[test]
fn clear_retains_inflight_requests_for_the_next_generation() {
    let mut buf = buffer();
    let now = Utc::now();
    buf.on_request(
        "pending".into(),
        "https://example.com/slow".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );
    buf.on_request(
        "done".into(),
        "https://example.com/fast".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );
    buf.on_response("done", 204, BTreeMap::new(), None, now);

    buf.clear();
    let stats = buf.stats();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.requests_pending, 1);

    // It completes into the post-clear generation.
    buf.on_response("pending", 200, BTreeMap::new(), None, now);
    let snapshot = buf.snapshot(Utc::now());
    assert_eq!(snapshot.requests.len(), 1);
    assert_eq!(snapshot.requests[0].id, "pending");
    assert_eq!(
        snapshot.requests[0].status,
        RequestStatus::Completed { http_status: 200 }
    );
}

#[test]
fn network_overview_keeps_first_seen_order_regardless_of_completion() {
    let mut buf = buffer();
    let now = Utc::now();
    for id in ["first", "second", "third"] {
        buf.on_request(
            id.into(),
            format!("https://example.com/{}", id),
            "GET".into(),
            BTreeMap::new(),
            None,
            now,
        );
    }
    buf.on_response("third", 200, BTreeMap::new(), None, now);
    buf.on_response("first", 500, BTreeMap::new(), None, now);

    let snapshot = buf.snapshot(Utc::now());
    let ids: Vec<&str> = snapshot.requests.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn stats_count_distinct_hosts_and_dropped_events() {
    let dropped = Arc::new(AtomicU64::new(0));
    let mut buf = LogBuffer::new(64 * 1024, Duration::from_secs(30), dropped.clone());
    let now = Utc::now();
    for (id, url) in [
        ("a", "https://example.com/x"),
        ("b", "https://example.com/y"),
        ("c", "https://api.other.net/z"),
    ] {
        buf.on_request(
            id.into(),
            url.into(),
            "GET".into(),
            BTreeMap::new(),
            None,
            now,
        );
    }
    dropped.store(7, Ordering::Relaxed);

    let stats = buf.stats();
    assert_eq!(stats.requests_total, 3);
    assert_eq!(stats.distinct_hosts, 2);
    assert_eq!(stats.dropped_events, 7);
    assert!(!stats.paused);
}
