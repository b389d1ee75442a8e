use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::BrowserSession;
use tabscope_common::error::SessionError;
use tabscope_common::protocol::{
    ArtifactKind, ArtifactOutcome, ArtifactStatus, BufferSnapshot, Cookie, DumpReport,
};

/// Materializes a buffer snapshot plus freshly queried page state to a
/// fixed directory layout, overwritten on each dump:
///
/// ```text
/// <output_dir>/
///   console.log          one line per console entry, arrival order
///   network.log          one line per request, first-seen order
///   requests/<id>.json   full record per request
///   cookies/<domain>.json
///   dom.html
///   screenshot.png
/// ```
///
/// A dump never fails as a whole: each artifact that cannot be produced
/// is reported as skipped with a reason.
pub struct SnapshotWriter {
    output_dir: PathBuf,
    fresh_timeout: Duration,
}

/// Result of one dump-time fresh query, already flattened across the
/// timeout and the session error.
type Fresh<T> = Result<T, String>;

impl SnapshotWriter {
    pub fn new(output_dir: PathBuf, fresh_timeout: Duration) -> Self {
        Self {
            output_dir,
            fresh_timeout,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write all artifacts for `snapshot`. The fresh queries run
    /// concurrently and are awaited jointly before any buffer-derived
    /// file is written, so the dump pairs "current state" with "history
    /// up to now".
    pub async fn dump(
        &self,
        snapshot: &BufferSnapshot,
        session: Option<&dyn BrowserSession>,
    ) -> DumpReport {
        let mut artifacts = Vec::new();

        if let Err(e) = fs::create_dir_all(&self.output_dir).await {
            warn!(dir = %self.output_dir.display(), "cannot create dump directory: {}", e);
            let reason = format!("create output dir: {}", e);
            for kind in [
                ArtifactKind::Cookies,
                ArtifactKind::Dom,
                ArtifactKind::Screenshot,
                ArtifactKind::Console,
                ArtifactKind::Network,
                ArtifactKind::RequestDetails,
            ] {
                artifacts.push(skipped(kind, reason.clone()));
            }
            return self.report(snapshot, artifacts);
        }

        let (cookies, dom, shot) = self.fresh_queries(session).await;

        match cookies {
            Ok(cookies) => artifacts.push(self.write_cookies(&cookies).await),
            Err(reason) => artifacts.push(skipped(ArtifactKind::Cookies, reason)),
        }
        match dom {
            Ok(html) => {
                artifacts.push(
                    self.write_file(ArtifactKind::Dom, "dom.html", html.as_bytes())
                        .await,
                );
            }
            Err(reason) => artifacts.push(skipped(ArtifactKind::Dom, reason)),
        }
        match shot {
            Ok(png) => {
                artifacts.push(
                    self.write_file(ArtifactKind::Screenshot, "screenshot.png", &png)
                        .await,
                );
            }
            Err(reason) => artifacts.push(skipped(ArtifactKind::Screenshot, reason)),
        }

        artifacts.push(self.write_console(snapshot).await);
        artifacts.push(self.write_network(snapshot).await);
        artifacts.push(self.write_request_details(snapshot).await);

        let report = self.report(snapshot, artifacts);
        info!(
            dir = %self.output_dir.display(),
            console = report.console_entries,
            requests = report.requests,
            skipped = report.skipped().count(),
            "dump written"
        );
        report
    }

    async fn fresh_queries(
        &self,
        session: Option<&dyn BrowserSession>,
    ) -> (Fresh<Vec<Cookie>>, Fresh<String>, Fresh<Vec<u8>>) {
        let Some(session) = session else {
            let reason = SessionError::NoBrowser.to_string();
            return (Err(reason.clone()), Err(reason.clone()), Err(reason));
        };
        let t = self.fresh_timeout;
        let (cookies, dom, shot) = tokio::join!(
            timeout(t, session.cookies()),
            timeout(t, session.document_html()),
            timeout(t, session.screenshot()),
        );
        (flatten(cookies), flatten(dom), flatten(shot))
    }

    async fn write_console(&self, snapshot: &BufferSnapshot) -> ArtifactOutcome {
        let mut out = String::new();
        for entry in &snapshot.console {
            out.push_str(&entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string());
            out.push_str(&format!(" [{}] {}", entry.level, entry.text));
            if let Some(source) = &entry.source {
                out.push_str(&format!(" ({})", source));
            }
            out.push('\n');
        }
        self.write_file(ArtifactKind::Console, "console.log", out.as_bytes())
            .await
    }

    async fn write_network(&self, snapshot: &BufferSnapshot) -> ArtifactOutcome {
        let mut out = String::new();
        for record in &snapshot.requests {
            out.push_str(&format!(
                "[{}] {} {} -> {}\n",
                record.id, record.method, record.url, record.status
            ));
        }
        self.write_file(ArtifactKind::Network, "network.log", out.as_bytes())
            .await
    }

    async fn write_request_details(&self, snapshot: &BufferSnapshot) -> ArtifactOutcome {
        let dir = self.output_dir.join("requests");
        if let Err(e) = reset_dir(&dir).await {
            return skipped(ArtifactKind::RequestDetails, format!("reset requests dir: {}", e));
        }
        for record in &snapshot.requests {
            let json = match serde_json::to_vec_pretty(record) {
                Ok(json) => json,
                Err(e) => {
                    return skipped(
                        ArtifactKind::RequestDetails,
                        format!("serialize request {}: {}", record.id, e),
                    );
                }
            };
            let path = dir.join(format!("{}.json", sanitize(&record.id)));
            if let Err(e) = fs::write(&path, json).await {
                return skipped(
                    ArtifactKind::RequestDetails,
                    format!("write {}: {}", path.display(), e),
                );
            }
        }
        debug!(count = snapshot.requests.len(), "request detail files written");
        written(ArtifactKind::RequestDetails)
    }

    async fn write_cookies(&self, cookies: &[Cookie]) -> ArtifactOutcome {
        let dir = self.output_dir.join("cookies");
        if let Err(e) = reset_dir(&dir).await {
            return skipped(ArtifactKind::Cookies, format!("reset cookies dir: {}", e));
        }
        let mut by_domain: BTreeMap<String, Vec<&Cookie>> = BTreeMap::new();
        for cookie in cookies {
            let domain = cookie
                .domain
                .as_deref()
                .map(|d| d.trim_start_matches('.').to_string())
                .unwrap_or_else(|| "unknown".to_string());
            by_domain.entry(domain).or_default().push(cookie);
        }
        for (domain, cookies) in &by_domain {
            let json = match serde_json::to_vec_pretty(cookies) {
                Ok(json) => json,
                Err(e) => {
                    return skipped(
                        ArtifactKind::Cookies,
                        format!("serialize cookies for {}: {}", domain, e),
                    );
                }
            };
            let path = dir.join(format!("{}.json", sanitize(domain)));
            if let Err(e) = fs::write(&path, json).await {
                return skipped(
                    ArtifactKind::Cookies,
                    format!("write {}: {}", path.display(), e),
                );
            }
        }
        written(ArtifactKind::Cookies)
    }

    async fn write_file(&self, kind: ArtifactKind, name: &str, bytes: &[u8]) -> ArtifactOutcome {
        let path = self.output_dir.join(name);
        match fs::write(&path, bytes).await {
            Ok(()) => written(kind),
            Err(e) => skipped(kind, format!("write {}: {}", path.display(), e)),
        }
    }

    fn report(&self, snapshot: &BufferSnapshot, artifacts: Vec<ArtifactOutcome>) -> DumpReport {
        DumpReport {
            output_dir: self.output_dir.clone(),
            taken_at: snapshot.taken_at,
            console_entries: snapshot.console.len(),
            requests: snapshot.requests.len(),
            artifacts,
        }
    }
}

fn flatten<T>(
    outcome: Result<Result<T, SessionError>, tokio::time::error::Elapsed>,
) -> Fresh<T> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("query timed out".to_string()),
    }
}

fn written(kind: ArtifactKind) -> ArtifactOutcome {
    ArtifactOutcome {
        artifact: kind,
        status: ArtifactStatus::Written,
    }
}

fn skipped(kind: ArtifactKind, reason: String) -> ArtifactOutcome {
    warn!(artifact = %kind, reason = %reason, "artifact skipped");
    ArtifactOutcome {
        artifact: kind,
        status: ArtifactStatus::Skipped { reason },
    }
}

/// Remove and recreate a per-dump subdirectory so stale files from a
/// previous, larger dump cannot survive.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir).await
}

/// Request ids and cookie domains become file names; anything outside a
/// conservative set is replaced.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
