use thiserror::Error;

/// Errors surfaced by the browser session and the engine's command surface.
///
/// Normal operating conditions (a tab index out of range, no browser
/// attached) are represented here so front-ends can render them as
/// structured results rather than panics.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no browser attached")]
    NoBrowser,

    #[error("invalid tab index {index} ({available} tabs open)")]
    InvalidTab { index: usize, available: usize },

    #[error("browser call failed: {0}")]
    Browser(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Stable machine-readable tag for front-end result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NoBrowser => "no_browser",
            SessionError::InvalidTab { .. } => "invalid_tab",
            SessionError::Browser(_) => "browser",
            SessionError::Io(_) => "io",
            SessionError::Closed => "closed",
        }
    }
}
