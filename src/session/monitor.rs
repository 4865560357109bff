//! Presence monitor.
//!
//! One cooperative task per session multiplexes cancellation, the lobby-wait
//! deadline and the poll tick in a single `select!`, so there is no separate
//! timer racing the polling loop. The monitor never tears anything down
//! itself: it returns a [`MonitorExit`] and the controller funnels that into
//! the ordinary stop path.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{SessionId, SessionStatusHandle};
use crate::client::{MeetingClient, ParticipantCount};

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Maximum time from `start()` to admission.
    pub lobby_wait: Duration,
    /// How long the bot may be alone before leaving. Zero leaves on the
    /// first lonely reading.
    pub alone_grace: Duration,
}

/// Why the monitor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// `stop()` began; nothing to do.
    Cancelled,
    /// The lobby-wait deadline elapsed before admission.
    NotAdmitted,
    /// Only the bot is left in the meeting.
    Alone,
}

pub struct PresenceMonitor {
    session_id: SessionId,
    client: Arc<dyn MeetingClient>,
    status: SessionStatusHandle,
    settings: MonitorSettings,
    cancel: CancellationToken,
    admitted: bool,
    lobby_deadline: Option<Instant>,
    alone_since: Option<Instant>,
    last_count: Option<u32>,
}

impl PresenceMonitor {
    /// `started` is the instant `start()` began; the lobby deadline is armed
    /// relative to it unless the join already reported admission.
    pub fn new(
        session_id: SessionId,
        client: Arc<dyn MeetingClient>,
        status: SessionStatusHandle,
        settings: MonitorSettings,
        cancel: CancellationToken,
        admitted: bool,
        started: Instant,
    ) -> Self {
        let lobby_deadline = (!admitted).then(|| started + settings.lobby_wait);
        Self {
            session_id,
            client,
            status,
            settings,
            cancel,
            admitted,
            lobby_deadline,
            alone_since: None,
            last_count: None,
        }
    }

    pub async fn run(mut self) -> MonitorExit {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Session {}: presence monitoring started (admitted: {})",
            self.session_id, self.admitted
        );

        loop {
            let deadline = self.lobby_deadline;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = sleep_until(deadline), if deadline.is_some() => return self.not_admitted(),
                _ = ticker.tick() => {}
            }

            let presence = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = sleep_until(deadline), if deadline.is_some() => return self.not_admitted(),
                presence = self.client.presence() => presence,
            };

            let presence = match presence {
                Ok(presence) => presence,
                Err(e) => {
                    warn!(
                        "Session {}: presence read failed, retrying: {:#}",
                        self.session_id, e
                    );
                    continue;
                }
            };

            if !self.admitted && presence.admitted {
                self.admitted = true;
                self.lobby_deadline = None;
                self.status.mark_admitted().await;
                info!("Session {}: admitted to meeting", self.session_id);
            }

            if let Some(exit) = self.observe_count(presence.participants).await {
                return exit;
            }
        }
    }

    async fn observe_count(&mut self, participants: ParticipantCount) -> Option<MonitorExit> {
        let count = match participants {
            ParticipantCount::Known(0) | ParticipantCount::Unknown => {
                debug!("Session {}: participant count unreadable", self.session_id);
                return None;
            }
            ParticipantCount::Known(count) => count,
        };

        self.status.set_participant_count(count).await;
        if self.last_count != Some(count) {
            info!("Session {}: participants: {}", self.session_id, count);
            self.last_count = Some(count);
        }

        if count >= 2 {
            self.lobby_deadline = None;
            self.alone_since = None;
            return None;
        }

        if !self.admitted {
            return None;
        }

        let since = *self.alone_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.settings.alone_grace {
            info!("Session {}: alone in meeting, leaving", self.session_id);
            return Some(MonitorExit::Alone);
        }
        None
    }

    fn not_admitted(&self) -> MonitorExit {
        info!(
            "Session {}: not admitted within {}s, leaving",
            self.session_id,
            self.settings.lobby_wait.as_secs()
        );
        MonitorExit::NotAdmitted
    }

    fn cancelled(&self) -> MonitorExit {
        debug!("Session {}: presence monitoring cancelled", self.session_id);
        MonitorExit::Cancelled
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
