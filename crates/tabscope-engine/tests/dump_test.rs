mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use chrono::Utc;
use common::MockSession;
use tabscope_engine::buffer::LogBuffer;
use tabscope_engine::protocol::{
    ArtifactKind, ArtifactStatus, BufferSnapshot, ConsoleEntry, ConsoleLevel,
    NetworkRequestRecord,
};
use tabscope_engine::writer::SnapshotWriter;

fn populated_buffer() -> LogBuffer {
    let mut buf = LogBuffer::new(
        64 * 1024,
        Duration::from_secs(30),
        Arc::new(AtomicU64::new(0)),
    );
    let now = Utc::now();
    buf.push_console(ConsoleEntry {
        timestamp: now,
        level: ConsoleLevel::Error,
        text: "boom".to_string(),
        source: Some("app.js:42".to_string()),
    });
    buf.push_console(ConsoleEntry {
        timestamp: now,
        level: ConsoleLevel::Log,
        text: "ready".to_string(),
        source: None,
    });
    buf.on_request(
        "r1".into(),
        "https://example.com/api".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );
    buf.on_response("r1", 200, BTreeMap::new(), Some("application/json".into()), now);
    buf.on_finished("r1", Some(r#"{"ok":true}"#.into()));
    buf.on_request(
        "r2".into(),
        "https://example.com/hangs".into(),
        "GET".into(),
        BTreeMap::new(),
        None,
        now,
    );
    buf
}

fn outcome(report: &tabscope_engine::protocol::DumpReport, kind: ArtifactKind) -> &ArtifactStatus {
    &report
        .artifacts
        .iter()
        .find(|a| a.artifact == kind)
        .unwrap()
        .status
}

#[tokio::test]
async fn dump_writes_the_full_artifact_layout() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SnapshotWriter::new(dir.path().to_path_buf(), Duration::from_secs(1));
    let session = MockSession::default();
    let snapshot = populated_buffer().snapshot(Utc::now());

    let report = writer.dump(&snapshot, Some(&session)).await;
    assert!(report.is_complete(), "artifacts: {:?}", report.artifacts);
    assert_eq!(report.console_entries, 2);
    assert_eq!(report.requests, 2);

    let console = std::fs::read_to_string(dir.path().join("console.log")).unwrap();
    let lines: Vec<&str> = console.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("[error] boom (app.js:42)"));
    assert!(lines[1].contains("[log] ready"));

    let network = std::fs::read_to_string(dir.path().join("network.log")).unwrap();
    assert!(network.contains("[r1] GET https://example.com/api -> 200"));
    // Still pending at dump time: reported incomplete, never pending.
    assert!(network.contains("[r2] GET https://example.com/hangs -> incomplete"));

    let r1: NetworkRequestRecord = serde_json::from_slice(
        &std::fs::read(dir.path().join("requests/r1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(r1.response_body.unwrap().data, r#"{"ok":true}"#);

    // One cookie file per domain, leading dots stripped.
    let mut cookie_files: Vec<String> = std::fs::read_dir(dir.path().join("cookies"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    cookie_files.sort();
    assert_eq!(cookie_files, vec!["cdn.other.net.json", "example.com.json"]);

    assert_eq!(
        std::fs::read_to_string(dir.path().join("dom.html")).unwrap(),
        "<html><body>hello</body></html>"
    );
    assert_eq!(
        std::fs::read(dir.path().join("screenshot.png")).unwrap(),
        vec![0x89, b'P', b'N', b'G']
    );
}

#[tokio::test]
async fn failed_fresh_query_is_a_partial_failure_not_a_dump_failure() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SnapshotWriter::new(dir.path().to_path_buf(), Duration::from_secs(1));
    let session = MockSession {
        dom: Err("page navigated away".to_string()),
        ..Default::default()
    };
    let snapshot = populated_buffer().snapshot(Utc::now());

    let report = writer.dump(&snapshot, Some(&session)).await;

    match outcome(&report, ArtifactKind::Dom) {
        ArtifactStatus::Skipped { reason } => assert!(reason.contains("page navigated away")),
        other => panic!("expected skipped dom, got {:?}", other),
    }
    assert_eq!(*outcome(&report, ArtifactKind::Console), ArtifactStatus::Written);
    assert_eq!(*outcome(&report, ArtifactKind::Screenshot), ArtifactStatus::Written);
    assert!(dir.path().join("console.log").exists());
    assert!(!dir.path().join("dom.html").exists());
}

#[tokio::test]
async fn slow_fresh_query_is_bounded_by_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SnapshotWriter::new(dir.path().to_path_buf(), Duration::from_millis(20));
    let session = MockSession {
        dom_delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let snapshot = populated_buffer().snapshot(Utc::now());

    let report = writer.dump(&snapshot, Some(&session)).await;
    match outcome(&report, ArtifactKind::Dom) {
        ArtifactStatus::Skipped { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected timed-out dom, got {:?}", other),
    }
    // Buffer-derived artifacts are unaffected.
    assert_eq!(*outcome(&report, ArtifactKind::Network), ArtifactStatus::Written);
}

#[tokio::test]
async fn dump_without_a_browser_still_writes_buffer_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SnapshotWriter::new(dir.path().to_path_buf(), Duration::from_secs(1));
    let snapshot = populated_buffer().snapshot(Utc::now());

    let report = writer.dump(&snapshot, None).await;

    for kind in [ArtifactKind::Cookies, ArtifactKind::Dom, ArtifactKind::Screenshot] {
        match outcome(&report, kind) {
            ArtifactStatus::Skipped { reason } => assert!(reason.contains("no browser")),
            other => panic!("expected skipped {:?}, got {:?}", kind, other),
        }
    }
    assert!(dir.path().join("console.log").exists());
    assert!(dir.path().join("requests/r2.json").exists());
}

#[tokio::test]
async fn repeated_dumps_overwrite_and_drop_stale_detail_files() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SnapshotWriter::new(dir.path().to_path_buf(), Duration::from_secs(1));
    let session = MockSession::default();

    let full = populated_buffer().snapshot(Utc::now());
    writer.dump(&full, Some(&session)).await;
    assert!(dir.path().join("requests/r2.json").exists());

    // Second dump from the same snapshot: byte-identical overviews,
    // same detail file set.
    let console_before = std::fs::read(dir.path().join("console.log")).unwrap();
    writer.dump(&full, Some(&session)).await;
    assert_eq!(
        std::fs::read(dir.path().join("console.log")).unwrap(),
        console_before
    );

    // A smaller snapshot leaves no stale files behind.
    let smaller = BufferSnapshot {
        taken_at: Utc::now(),
        console: full.console.clone(),
        requests: full.requests[..1].to_vec(),
    };
    writer.dump(&smaller, Some(&session)).await;
    assert!(dir.path().join("requests/r1.json").exists());
    assert!(!dir.path().join("requests/r2.json").exists());
}
