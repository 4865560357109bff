//! Meeting client abstraction.
//!
//! The session controller only sees the narrow [`MeetingClient`] interface:
//! join, read presence, leave, close. How presence is actually observed
//! (DOM polling, pushed events) is the implementation's business.

pub mod driver;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::session::SessionId;

pub use driver::{DriverClient, DriverClientFactory, DriverSettings};

/// Participant count as reported by the meeting UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantCount {
    Known(u32),
    /// The count could not be read this interval.
    Unknown,
}

impl ParticipantCount {
    /// Negative raw values are the "unreadable" sentinel.
    pub fn from_raw(raw: i64) -> Self {
        u32::try_from(raw)
            .map(Self::Known)
            .unwrap_or(Self::Unknown)
    }
}

/// One presence observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub admitted: bool,
    pub participants: ParticipantCount,
}

impl Presence {
    pub fn new(admitted: bool, participants: ParticipantCount) -> Self {
        Self {
            admitted,
            participants,
        }
    }
}

/// Everything the client needs to join on behalf of one session.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub session_id: SessionId,
    pub meeting_url: String,
    pub display_name: String,
    /// Name of the audio sink the client must route meeting audio into.
    pub audio_sink: String,
}

/// Result of a join attempt that reached the meeting or its lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False while waiting in the lobby.
    pub admitted: bool,
}

#[async_trait]
pub trait MeetingClient: Send + Sync {
    /// Navigate to the meeting and press join. Errors mean no joinable
    /// state was reached.
    async fn join(&self, request: &JoinRequest) -> Result<JoinOutcome>;

    /// Current admission flag and participant count.
    async fn presence(&self) -> Result<Presence>;

    /// Leave the meeting. Best-effort.
    async fn leave(&self) -> Result<()>;

    /// Release the underlying browser.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates one client per session.
pub trait MeetingClientFactory: Send + Sync {
    fn create(&self, session_id: &SessionId) -> Arc<dyn MeetingClient>;
}
