use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use tabscope_common::protocol::ArtifactStatus;
use tabscope_engine::session::SessionHandle;

/// Keyboard trigger loop. Every command forwards to the engine and
/// prints the structured result; nothing here touches the buffer.
///
/// Reads stdin asynchronously so the caller can race this loop against
/// the engine task; a hard timeout must not wait for a keypress.
pub async fn run(handle: &SessionHandle) -> anyhow::Result<()> {
    println!("Monitoring. Commands: dump, status, clear, pause, resume, tabs, tab N, exit.");

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        execute_line(handle, trimmed).await;
    }
    Ok(())
}

async fn execute_line(handle: &SessionHandle, line: &str) {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();

    match command {
        "dump" => match handle.dump().await {
            Ok(report) => {
                println!(
                    "Dump written to {} ({} console entries, {} requests)",
                    report.output_dir.display(),
                    report.console_entries,
                    report.requests
                );
                for artifact in report.skipped() {
                    if let ArtifactStatus::Skipped { reason } = &artifact.status {
                        println!("  skipped {}: {}", artifact.artifact, reason);
                    }
                }
            }
            Err(e) => println!("Dump Error: {}", e),
        },
        "status" => match handle.status().await {
            Ok(status) => {
                let tab = status
                    .bound_tab
                    .as_ref()
                    .map(|t| format!("tab {} ({})", t.index, t.url))
                    .unwrap_or_else(|| "default tab".to_string());
                println!(
                    "{:?}, {} | console: {} | requests: {} ({} pending, {} hosts) | dropped: {}{}",
                    status.phase,
                    tab,
                    status.stats.console_entries,
                    status.stats.requests_total,
                    status.stats.requests_pending,
                    status.stats.distinct_hosts,
                    status.stats.dropped_events,
                    if status.stats.paused { " | PAUSED" } else { "" }
                );
            }
            Err(e) => println!("Status Error: {}", e),
        },
        "clear" => match handle.clear().await {
            Ok(()) => println!("Buffer cleared."),
            Err(e) => println!("Clear Error: {}", e),
        },
        "pause" => match handle.pause().await {
            Ok(_) => println!("Collection paused."),
            Err(e) => println!("Pause Error: {}", e),
        },
        "resume" => match handle.resume().await {
            Ok(_) => println!("Collection resumed."),
            Err(e) => println!("Resume Error: {}", e),
        },
        "tabs" => match handle.list_tabs().await {
            Ok(tabs) => {
                println!("Tabs ({}):", tabs.len());
                for tab in tabs {
                    println!("  [{}] {} ({})", tab.index, tab.title, tab.url);
                }
            }
            Err(e) => println!("Tabs Error: {}", e),
        },
        "tab" => match parts.next().and_then(|s| s.parse::<usize>().ok()) {
            Some(index) => match handle.switch_tab(index).await {
                Ok(tab) => println!("Monitoring tab {}: {} ({})", tab.index, tab.title, tab.url),
                Err(e) => println!("Switch Error: {}", e),
            },
            None => println!("Usage: tab N (1-based index, see 'tabs')"),
        },
        other => println!("Unknown command: {}", other),
    }
}
