//! Error types for session lifecycle operations.

use std::time::Duration;
use thiserror::Error;

use super::state::SessionPhase;

/// Errors surfaced by the session controller and registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The meeting client could not reach a joinable state.
    #[error("failed to join meeting: {0}")]
    Join(String),

    /// The lobby-wait deadline elapsed before the host admitted the bot.
    #[error("not admitted within configured window ({})", window_label(.wait))]
    AdmissionTimeout { wait: Duration },

    /// Audio device allocation or stream failure.
    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {0} already exists")]
    Duplicate(String),

    /// The session has already reached `stopped` or `failed`.
    #[error("session {id} is already {phase}")]
    AlreadyTerminal { id: String, phase: SessionPhase },

    #[error("session {id} cannot start while {phase}")]
    InvalidState { id: String, phase: SessionPhase },

    /// `start()` was interrupted by a concurrent stop.
    #[error("session {0} was stopped before it finished joining")]
    Aborted(String),
}

impl SessionError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the error should be treated as a no-op by callers.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. } | Self::Aborted(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

fn window_label(wait: &Duration) -> String {
    let secs = wait.as_secs();
    if secs < 60 {
        format!("{} seconds", secs)
    } else {
        format!("{} minutes", secs / 60)
    }
}
