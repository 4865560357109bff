//! Meeting client backed by an external browser-automation driver.
//!
//! One driver process is launched per session. It receives the meeting
//! details through environment variables, reports JSON-lines events on
//! stdout and accepts commands on stdin:
//!
//! ```text
//! <- {"type":"joined","admitted":false}
//! <- {"type":"presence","admitted":true,"participants":3}
//! -> {"command":"leave"}
//! <- {"type":"left"}
//! ```
//!
//! A `participants` value of `null` or below zero means the count could not
//! be read. The process is killed on `close()` or when the client drops.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    JoinOutcome, JoinRequest, MeetingClient, MeetingClientFactory, ParticipantCount, Presence,
};
use crate::session::SessionId;

/// Environment variable names passed to the driver process.
pub mod driver_env {
    pub const SESSION_ID: &str = "MEETREC_SESSION_ID";
    pub const MEETING_URL: &str = "MEETREC_MEETING_URL";
    pub const DISPLAY_NAME: &str = "MEETREC_DISPLAY_NAME";
    pub const AUDIO_SINK: &str = "MEETREC_AUDIO_SINK";
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub command: String,
    pub args: Vec<String>,
    pub join_timeout: Duration,
    pub leave_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverEvent {
    Joined {
        admitted: bool,
    },
    JoinFailed {
        reason: String,
    },
    Presence {
        admitted: bool,
        #[serde(default)]
        participants: Option<i64>,
    },
    Left,
}

#[derive(Debug, Clone, Default)]
struct DriverState {
    presence: Option<Presence>,
    left: bool,
    exited: bool,
}

struct DriverProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    state: watch::Receiver<DriverState>,
    reader: JoinHandle<()>,
}

pub struct DriverClient {
    session_id: SessionId,
    settings: DriverSettings,
    process: Mutex<Option<DriverProcess>>,
}

impl DriverClient {
    pub fn new(session_id: SessionId, settings: DriverSettings) -> Self {
        Self {
            session_id,
            settings,
            process: Mutex::new(None),
        }
    }

    fn spawn(&self, request: &JoinRequest) -> Result<Child> {
        Command::new(&self.settings.command)
            .args(&self.settings.args)
            .env(driver_env::SESSION_ID, request.session_id.as_str())
            .env(driver_env::MEETING_URL, &request.meeting_url)
            .env(driver_env::DISPLAY_NAME, &request.display_name)
            .env(driver_env::AUDIO_SINK, &request.audio_sink)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("Failed to launch meeting driver '{}'", self.settings.command)
            })
    }
}

#[async_trait]
impl MeetingClient for DriverClient {
    async fn join(&self, request: &JoinRequest) -> Result<JoinOutcome> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            bail!("Meeting driver already running for session {}", self.session_id);
        }

        info!(
            "Session {}: launching meeting driver for {}",
            self.session_id, request.meeting_url
        );
        let mut child = self.spawn(request)?;
        let stdout = child
            .stdout
            .take()
            .context("Meeting driver stdout unavailable")?;
        let stdin = child.stdin.take();

        let (join_tx, join_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(DriverState::default());
        let reader = tokio::spawn(read_events(
            self.session_id.clone(),
            stdout,
            join_tx,
            state_tx,
        ));

        *guard = Some(DriverProcess {
            child,
            stdin,
            state: state_rx,
            reader,
        });
        drop(guard);

        match tokio::time::timeout(self.settings.join_timeout, join_rx).await {
            Ok(Ok(Ok(admitted))) => Ok(JoinOutcome { admitted }),
            Ok(Ok(Err(reason))) => bail!("Meeting driver reported join failure: {}", reason),
            Ok(Err(_)) => bail!("Meeting driver exited before reporting a join result"),
            Err(_) => bail!(
                "Meeting driver did not reach the meeting within {}s",
                self.settings.join_timeout.as_secs()
            ),
        }
    }

    async fn presence(&self) -> Result<Presence> {
        let guard = self.process.lock().await;
        let process = guard.as_ref().context("Meeting driver is not running")?;
        let state = process.state.borrow().clone();

        if state.exited {
            bail!("Meeting driver exited");
        }
        state
            .presence
            .context("Meeting driver has not reported presence yet")
    }

    async fn leave(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        let process = guard.as_mut().context("Meeting driver is not running")?;

        if let Some(mut stdin) = process.stdin.take() {
            stdin
                .write_all(b"{\"command\":\"leave\"}\n")
                .await
                .context("Failed to send leave command to meeting driver")?;
            stdin.flush().await?;
        }

        let mut state = process.state.clone();
        let confirmed = tokio::time::timeout(self.settings.leave_timeout, async {
            state.wait_for(|s| s.left || s.exited).await.is_ok()
        })
        .await
        .is_ok();

        if !confirmed {
            bail!(
                "Meeting driver did not confirm leaving within {}s",
                self.settings.leave_timeout.as_secs()
            );
        }
        info!("Session {}: left meeting", self.session_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = process.child.start_kill() {
            debug!("Meeting driver already gone: {}", e);
        }
        match tokio::time::timeout(Duration::from_secs(5), process.child.wait()).await {
            Ok(Ok(status)) => debug!(
                "Session {}: meeting driver exited with {}",
                self.session_id, status
            ),
            Ok(Err(e)) => warn!("Failed to reap meeting driver: {}", e),
            Err(_) => warn!(
                "Session {}: meeting driver did not exit after kill",
                self.session_id
            ),
        }
        process.reader.abort();
        Ok(())
    }
}

async fn read_events(
    session_id: SessionId,
    stdout: ChildStdout,
    join_tx: oneshot::Sender<std::result::Result<bool, String>>,
    state_tx: watch::Sender<DriverState>,
) {
    let mut join_tx = Some(join_tx);
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Session {}: driver stdout read failed: {}", session_id, e);
                break;
            }
        };

        let event = match serde_json::from_str::<DriverEvent>(&line) {
            Ok(event) => event,
            Err(_) => {
                debug!("Session {} driver: {}", session_id, line.trim());
                continue;
            }
        };

        match event {
            DriverEvent::Joined { admitted } => {
                if let Some(tx) = join_tx.take() {
                    let _ = tx.send(Ok(admitted));
                }
                state_tx.send_modify(|s| {
                    s.presence = Some(Presence::new(admitted, ParticipantCount::Unknown));
                });
            }
            DriverEvent::JoinFailed { reason } => {
                if let Some(tx) = join_tx.take() {
                    let _ = tx.send(Err(reason));
                }
            }
            DriverEvent::Presence {
                admitted,
                participants,
            } => {
                let participants = participants
                    .map(ParticipantCount::from_raw)
                    .unwrap_or(ParticipantCount::Unknown);
                state_tx.send_modify(|s| {
                    s.presence = Some(Presence::new(admitted, participants));
                });
            }
            DriverEvent::Left => state_tx.send_modify(|s| s.left = true),
        }
    }

    state_tx.send_modify(|s| s.exited = true);
}

/// Builds a [`DriverClient`] for every new session.
pub struct DriverClientFactory {
    settings: DriverSettings,
}

impl DriverClientFactory {
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }
}

impl MeetingClientFactory for DriverClientFactory {
    fn create(&self, session_id: &SessionId) -> Arc<dyn MeetingClient> {
        Arc::new(DriverClient::new(session_id.clone(), self.settings.clone()))
    }
}
