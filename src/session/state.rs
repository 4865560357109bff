//! Session lifecycle types and the shared state handle.
//!
//! All mutations go through [`SessionStatusHandle`], whose transition methods
//! enforce the forward-only lifecycle: terminal phases are never left, the
//! stop timestamp and error detail are written at most once, and admission
//! never reverts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Phase of a session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Joining,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Snapshot of one session, readable by API handlers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub meeting_url: String,
    pub display_name: String,
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub admitted: bool,
    pub participant_count: Option<u32>,
    pub recording_file: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, meeting_url: String, display_name: String) -> Self {
        Self {
            session_id,
            meeting_url,
            display_name,
            phase: SessionPhase::Idle,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            recording_started_at: None,
            admitted: false,
            participant_count: None,
            recording_file: None,
            error_message: None,
        }
    }

    /// Seconds since `start()`, frozen once the session stopped.
    pub fn uptime_seconds(&self) -> Option<f64> {
        self.started_at.map(|started| seconds_between(started, self.stopped_at))
    }

    /// Seconds since capture began, frozen once the session stopped.
    pub fn recording_duration_seconds(&self) -> Option<f64> {
        self.recording_started_at
            .map(|started| seconds_between(started, self.stopped_at))
    }

    fn record_error(&mut self, message: String) {
        if self.error_message.is_none() {
            self.error_message = Some(message);
        }
    }

    fn stamp_stop(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Utc::now());
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> f64 {
    let end = end.unwrap_or_else(Utc::now);
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

/// Outcome of asking a session to begin stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTransition {
    /// This caller moved the session into `Stopping` and owns the teardown.
    Begun,
    /// Another caller already began stopping.
    InProgress,
    /// Already `Stopped` or `Failed`.
    Terminal(SessionPhase),
}

/// Thread-safe handle for sharing session state between the controller,
/// its monitor task and API handlers.
#[derive(Clone)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionRecord>>,
}

impl SessionStatusHandle {
    pub fn new(record: SessionRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    pub async fn get(&self) -> SessionRecord {
        self.inner.lock().await.clone()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    /// Idle → Joining. Returns the current phase on refusal.
    pub async fn begin_joining(&self) -> Result<(), SessionPhase> {
        let mut state = self.inner.lock().await;
        if state.phase != SessionPhase::Idle {
            return Err(state.phase);
        }
        state.phase = SessionPhase::Joining;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Joining → Recording. False if a stop or failure got there first.
    pub async fn begin_recording(&self, admitted: bool) -> bool {
        let mut state = self.inner.lock().await;
        if state.phase != SessionPhase::Joining {
            return false;
        }
        state.phase = SessionPhase::Recording;
        state.admitted |= admitted;
        true
    }

    /// Records the artifact path the first time capture starts.
    pub async fn set_recording_file(&self, path: PathBuf) {
        let mut state = self.inner.lock().await;
        if state.recording_file.is_none() {
            state.recording_file = Some(path);
            state.recording_started_at = Some(Utc::now());
        }
    }

    /// Flips admission to true. Returns true only on the first flip.
    pub async fn mark_admitted(&self) -> bool {
        let mut state = self.inner.lock().await;
        let first = !state.admitted;
        state.admitted = true;
        first
    }

    pub async fn set_participant_count(&self, count: u32) {
        self.inner.lock().await.participant_count = Some(count);
    }

    /// Idle/Joining/Recording → Stopping, recording `reason` as error detail.
    pub async fn begin_stopping(&self, reason: Option<String>) -> StopTransition {
        let mut state = self.inner.lock().await;
        match state.phase {
            SessionPhase::Idle | SessionPhase::Joining | SessionPhase::Recording => {
                state.phase = SessionPhase::Stopping;
                state.stamp_stop();
                if let Some(reason) = reason {
                    state.record_error(reason);
                }
                StopTransition::Begun
            }
            SessionPhase::Stopping => StopTransition::InProgress,
            phase => StopTransition::Terminal(phase),
        }
    }

    /// Joining/Recording → Failed. False if the session was already leaving.
    pub async fn fail(&self, error: String) -> bool {
        let mut state = self.inner.lock().await;
        if !matches!(state.phase, SessionPhase::Joining | SessionPhase::Recording) {
            return false;
        }
        state.phase = SessionPhase::Failed;
        state.stamp_stop();
        state.record_error(error);
        true
    }

    /// Stopping → Stopped.
    pub async fn finish_stopping(&self) {
        let mut state = self.inner.lock().await;
        if state.phase == SessionPhase::Stopping {
            state.phase = SessionPhase::Stopped;
        }
    }
}
