use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::backend::{BrowserSession, EventFeed};
use crate::buffer::LogBuffer;
use crate::config::CaptureConfig;
use crate::normalizer::EventNormalizer;
use crate::writer::SnapshotWriter;
use tabscope_common::error::SessionError;
use tabscope_common::protocol::{BufferStats, DumpReport, RawEvent, TabInfo};

/// Grace period for the best-effort final dump taken when the hard
/// timeout fires or the browser session is lost.
const FINAL_DUMP_GRACE: Duration = Duration::from_secs(10);

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoBrowser,
    Connected,
    Disconnected,
}

/// The one explicit session-state value; no ambient singletons.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub bound_tab: Option<TabInfo>,
}

/// Snapshot of state and counters for the status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub bound_tab: Option<TabInfo>,
    #[serde(flatten)]
    pub stats: BufferStats,
}

enum Command {
    Dump(oneshot::Sender<DumpReport>),
    Status(oneshot::Sender<SessionStatus>),
    Clear(oneshot::Sender<()>),
    Pause(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
    ListTabs(oneshot::Sender<Result<Vec<TabInfo>, SessionError>>),
    SwitchTab {
        index: usize,
        reply: oneshot::Sender<Result<TabInfo, SessionError>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle the front-ends use to drive the engine. Every
/// operation returns a structured value; the only error a healthy
/// engine ever produces here is `Closed` after shutdown.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn dump(&self) -> Result<DumpReport, SessionError> {
        self.request(Command::Dump).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(Command::Status).await
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(Command::Clear).await
    }

    /// Returns the paused flag after the toggle.
    pub async fn pause(&self) -> Result<bool, SessionError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<bool, SessionError> {
        self.request(Command::Resume).await
    }

    pub async fn list_tabs(&self) -> Result<Vec<TabInfo>, SessionError> {
        self.request(Command::ListTabs).await?
    }

    pub async fn switch_tab(&self, index: usize) -> Result<TabInfo, SessionError> {
        self.request(|reply| Command::SwitchTab { index, reply })
            .await?
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(Command::Shutdown).await
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Binds the engine to one monitored tab and dispatches trigger sources
/// (keyboard, HTTP, timeout) into buffer and writer operations. Owns
/// the buffer outright; all mutation happens on this task.
pub struct SessionController {
    session: Option<Box<dyn BrowserSession>>,
    state: SessionState,
    config: CaptureConfig,
    normalizer: EventNormalizer,
    buffer: LogBuffer,
    writer: SnapshotWriter,
    feed: Option<EventFeed>,
    events: mpsc::Receiver<RawEvent>,
    commands: mpsc::Receiver<Command>,
}

impl SessionController {
    /// Build the controller and its front-end handle. Fails only on an
    /// invalid denylist pattern, which is a startup error.
    pub fn new(
        session: Option<Box<dyn BrowserSession>>,
        config: CaptureConfig,
    ) -> Result<(Self, SessionHandle), regex::Error> {
        let denylist = config.compile_denylist()?;
        let (feed, events, dropped) = EventFeed::channel(config.event_capacity);
        let buffer = LogBuffer::new(config.body_ceiling, config.pending_timeout(), dropped);
        let writer = SnapshotWriter::new(config.output_dir.clone(), config.fresh_query_timeout());
        let (command_tx, commands) = mpsc::channel(16);
        let phase = if session.is_some() {
            SessionPhase::Connected
        } else {
            SessionPhase::NoBrowser
        };
        let controller = Self {
            session,
            state: SessionState {
                phase,
                bound_tab: None,
            },
            config,
            normalizer: EventNormalizer::new(denylist),
            buffer,
            writer,
            feed: Some(feed),
            events,
            commands,
        };
        Ok((controller, SessionHandle { tx: command_tx }))
    }

    /// Run until shutdown, hard timeout, or loss of the browser
    /// session. Consumes the controller; the buffer dies with it.
    pub async fn run(mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Some(feed) = self.feed.take() {
                if let Err(e) = session.subscribe_events(feed).await {
                    warn!("failed to subscribe to instrumentation events: {}", e);
                }
            }
        }

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let hard_timeout = self.config.hard_timeout();
        let deadline = async move {
            match hard_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.normalizer.apply(event, &mut self.buffer);
                    }
                    None => {
                        warn!("instrumentation feed closed, disconnecting after final dump");
                        self.final_dump().await;
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if matches!(self.handle_command(command).await, Flow::Stop) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.buffer.sweep(Utc::now());
                }
                _ = &mut deadline => {
                    info!("hard timeout reached, taking final dump");
                    self.final_dump().await;
                    break;
                }
            }
        }

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("error closing browser session: {}", e);
            }
        }
        self.state.phase = SessionPhase::Disconnected;
        info!("session disconnected");
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Dump(reply) => {
                let report = self.dump().await;
                let _ = reply.send(report);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Clear(reply) => {
                self.buffer.clear();
                let _ = reply.send(());
            }
            Command::Pause(reply) => {
                self.buffer.pause();
                info!("collection paused");
                let _ = reply.send(true);
            }
            Command::Resume(reply) => {
                self.buffer.resume();
                info!("collection resumed");
                let _ = reply.send(false);
            }
            Command::ListTabs(reply) => {
                let result = match self.session.as_ref() {
                    Some(session) => session.list_tabs().await,
                    None => Err(SessionError::NoBrowser),
                };
                let _ = reply.send(result);
            }
            Command::SwitchTab { index, reply } => {
                let _ = reply.send(self.switch_tab(index).await);
            }
            Command::Shutdown(reply) => {
                info!("shutdown requested");
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn dump(&mut self) -> DumpReport {
        // The snapshot is taken before any suspension point; events and
        // clears arriving while artifacts are written cannot affect it.
        self.buffer.sweep(Utc::now());
        let snapshot = self.buffer.snapshot(Utc::now());
        self.writer.dump(&snapshot, self.session.as_deref()).await
    }

    async fn final_dump(&mut self) {
        let snapshot = self.buffer.snapshot(Utc::now());
        let session = self.session.as_deref();
        match tokio::time::timeout(FINAL_DUMP_GRACE, self.writer.dump(&snapshot, session)).await {
            Ok(report) => info!(
                skipped = report.skipped().count(),
                "final dump written"
            ),
            Err(_) => warn!("final dump timed out"),
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.state.phase,
            bound_tab: self.state.bound_tab.clone(),
            stats: self.buffer.stats(),
        }
    }

    /// Revalidate the 1-based index against the live tab list, then
    /// rebind event subscriptions. Already-buffered events keep their
    /// original attribution.
    async fn switch_tab(&mut self, index: usize) -> Result<TabInfo, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NoBrowser);
        };
        let tabs = session.list_tabs().await?;
        if index == 0 || index > tabs.len() {
            return Err(SessionError::InvalidTab {
                index,
                available: tabs.len(),
            });
        }
        let tab = session.bind_tab(index).await?;
        info!(index, url = %tab.url, "switched monitored tab");
        self.state.bound_tab = Some(tab.clone());
        Ok(tab)
    }
}
