//! Session lifecycle controller.
//!
//! Drives one meeting attempt end-to-end:
//! join → record → monitor presence → stop → notify → released.
//!
//! Every exit path (external stop, lobby timeout, lonely meeting, failed
//! start) ends in the same teardown, which runs exactly once per session.

use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{SessionError, SessionResult};
use super::monitor::{MonitorExit, MonitorSettings, PresenceMonitor};
use super::state::{SessionId, SessionPhase, SessionRecord, SessionStatusHandle, StopTransition};
use crate::audio::{AudioCapture, AudioSink, CaptureFactory, SinkAllocator};
use crate::client::{JoinRequest, MeetingClient, MeetingClientFactory};
use crate::notify::CompletionNotifier;

/// Error detail recorded when the bot is left alone.
pub const ALONE_REASON: &str = "no other participants present";

/// Timing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub monitor: MonitorSettings,
    /// Grace period for the capture task to flush on stop.
    pub capture_stop_timeout: Duration,
    /// How long stop waits for the monitor to acknowledge cancellation.
    pub monitor_stop_timeout: Duration,
    pub leave_timeout: Duration,
    /// How long stop waits for completion hooks before detaching them.
    pub notify_timeout: Duration,
    pub recordings_dir: PathBuf,
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionBackends {
    pub clients: Arc<dyn MeetingClientFactory>,
    pub captures: Arc<dyn CaptureFactory>,
    pub sinks: Arc<dyn SinkAllocator>,
    pub notifier: Arc<CompletionNotifier>,
}

#[derive(Default)]
struct Resources {
    sink: Option<AudioSink>,
    capture: Option<Arc<dyn AudioCapture>>,
    monitor: Option<JoinHandle<()>>,
    join_attempted: bool,
}

pub struct SessionController {
    id: SessionId,
    status: SessionStatusHandle,
    client: Arc<dyn MeetingClient>,
    backends: SessionBackends,
    settings: SessionSettings,
    cancel: CancellationToken,
    resources: Mutex<Resources>,
    teardown_started: AtomicBool,
    teardown_done: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(
        meeting_url: String,
        display_name: String,
        backends: SessionBackends,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let id = SessionId::generate();
        let client = backends.clients.create(&id);
        let status = SessionStatusHandle::new(SessionRecord::new(
            id.clone(),
            meeting_url,
            display_name,
        ));
        info!("Initialized session {}", id);

        Arc::new(Self {
            id,
            status,
            client,
            backends,
            settings,
            cancel: CancellationToken::new(),
            resources: Mutex::new(Resources::default()),
            teardown_started: AtomicBool::new(false),
            teardown_done: watch::channel(false).0,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn status(&self) -> SessionRecord {
        self.status.get().await
    }

    pub async fn phase(&self) -> SessionPhase {
        self.status.phase().await
    }

    /// Join the meeting and begin recording.
    ///
    /// Returns once capture and presence monitoring are running. On failure
    /// the session is `failed`, everything acquired so far has been released
    /// and the error is returned. No retry is attempted.
    pub async fn start(self: &Arc<Self>) -> SessionResult<()> {
        if let Err(phase) = self.status.begin_joining().await {
            return Err(if phase.is_terminal() {
                SessionError::AlreadyTerminal {
                    id: self.id.to_string(),
                    phase,
                }
            } else {
                SessionError::InvalidState {
                    id: self.id.to_string(),
                    phase,
                }
            });
        }

        info!("Starting session {}", self.id);
        let started = Instant::now();

        match self.launch(started).await {
            Ok(()) => {
                info!("Session {} recording", self.id);
                Ok(())
            }
            Err(e) if self.status.fail(e.to_string()).await => {
                error!("Session {}: start failed: {}", self.id, e);
                self.cancel.cancel();
                self.begin_teardown();
                self.wait_for_teardown().await;
                Err(e)
            }
            Err(SessionError::Aborted(id)) => {
                debug!("Session {}: start interrupted by stop", id);
                Err(SessionError::Aborted(id))
            }
            Err(e) => {
                warn!(
                    "Session {}: start failed while already stopping: {}",
                    self.id, e
                );
                Err(SessionError::Aborted(self.id.to_string()))
            }
        }
    }

    async fn launch(self: &Arc<Self>, started: Instant) -> SessionResult<()> {
        let sink = {
            let mut resources = self.resources.lock().await;
            if self.cancel.is_cancelled() {
                return Err(SessionError::Aborted(self.id.to_string()));
            }
            let sink = self
                .backends
                .sinks
                .allocate(&self.id)
                .await
                .map_err(|e| SessionError::Capture(format!("{:#}", e)))?;
            resources.sink = Some(sink.clone());
            resources.join_attempted = true;
            sink
        };

        let record = self.status.get().await;
        let request = JoinRequest {
            session_id: self.id.clone(),
            meeting_url: record.meeting_url,
            display_name: record.display_name,
            audio_sink: sink.name.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(SessionError::Aborted(self.id.to_string()));
            }
            outcome = self.client.join(&request) => {
                outcome.map_err(|e| SessionError::Join(format!("{:#}", e)))?
            }
        };
        if outcome.admitted {
            info!("Session {}: joined meeting", self.id);
        } else {
            info!("Session {}: in lobby, waiting for admission", self.id);
        }

        let mut resources = self.resources.lock().await;
        if !self.status.begin_recording(outcome.admitted).await {
            return Err(SessionError::Aborted(self.id.to_string()));
        }

        let output = self.artifact_path();
        let capture: Arc<dyn AudioCapture> = Arc::from(self.backends.captures.create(&sink));
        let capture_started = capture.start(&output).await;
        resources.capture = Some(capture.clone());
        capture_started.map_err(|e| SessionError::Capture(format!("{:#}", e)))?;
        self.status.set_recording_file(output.clone()).await;
        info!("Session {}: recording to {:?}", self.id, output);

        let monitor = PresenceMonitor::new(
            self.id.clone(),
            self.client.clone(),
            self.status.clone(),
            self.settings.monitor,
            self.cancel.child_token(),
            outcome.admitted,
            started,
        );
        resources.monitor = Some(tokio::spawn(watch_session(
            monitor,
            capture,
            Arc::downgrade(self),
            self.settings.monitor,
        )));

        Ok(())
    }

    /// Stop the session and wait for teardown to finish.
    ///
    /// Teardown runs on its own task, started once, so dropping this future
    /// never interrupts it. Concurrent callers all wait for the same run;
    /// calls on a finished session return [`SessionError::AlreadyTerminal`].
    pub async fn stop(self: &Arc<Self>) -> SessionResult<()> {
        let result = self.request_stop(None).await;
        self.wait_for_teardown().await;
        result
    }

    /// Moves the session to `stopping` and makes sure teardown is running.
    async fn request_stop(self: &Arc<Self>, reason: Option<String>) -> SessionResult<()> {
        match self.status.begin_stopping(reason).await {
            StopTransition::Begun => info!("Stopping session {}", self.id),
            StopTransition::InProgress => {
                debug!("Session {} already stopping", self.id)
            }
            StopTransition::Terminal(phase) => {
                // A failed start may not have reached its own teardown.
                self.begin_teardown();
                return Err(SessionError::AlreadyTerminal {
                    id: self.id.to_string(),
                    phase,
                });
            }
        }

        self.cancel.cancel();
        self.begin_teardown();
        Ok(())
    }

    /// Fails a recording session whose capture died underneath it.
    async fn capture_lost(self: &Arc<Self>) {
        let error = SessionError::Capture("audio stream ended unexpectedly".to_string());
        if self.status.fail(error.to_string()).await {
            error!("Session {}: {}", self.id, error);
            self.cancel.cancel();
            self.begin_teardown();
        } else {
            debug!("Session {}: capture ended while leaving", self.id);
        }
    }

    fn begin_teardown(self: &Arc<Self>) {
        if self.teardown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.run_teardown().await;
            controller.teardown_done.send_replace(true);
        });
    }

    async fn wait_for_teardown(&self) {
        let mut done = self.teardown_done.subscribe();
        // The sender lives as long as `self`.
        let _ = done.wait_for(|done| *done).await;
    }

    /// Release everything the session holds. Each step is independent: a
    /// failure is logged and the next step still runs.
    async fn run_teardown(&self) {
        let (monitor, capture, sink, join_attempted) = {
            let mut resources = self.resources.lock().await;
            (
                resources.monitor.take(),
                resources.capture.take(),
                resources.sink.take(),
                resources.join_attempted,
            )
        };

        if let Some(mut monitor) = monitor {
            let timeout = self.settings.monitor_stop_timeout;
            if tokio::time::timeout(timeout, &mut monitor).await.is_err() {
                warn!(
                    "Session {}: presence monitor ignored cancellation for {}s, aborting it",
                    self.id,
                    timeout.as_secs()
                );
                monitor.abort();
            }
        }

        if join_attempted {
            match tokio::time::timeout(self.settings.leave_timeout, self.client.leave()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session {}: leave failed: {:#}", self.id, e),
                Err(_) => warn!("Session {}: leave timed out", self.id),
            }
        }

        if let Some(capture) = capture {
            let timeout = self.settings.capture_stop_timeout;
            match tokio::time::timeout(timeout, capture.stop()).await {
                Ok(Ok(())) => info!("Session {}: recording stopped", self.id),
                Ok(Err(e)) => error!("Session {}: stopping capture failed: {:#}", self.id, e),
                Err(_) => error!(
                    "Session {}: capture did not stop within {}s, forcing release",
                    self.id,
                    timeout.as_secs()
                ),
            }
        }

        if join_attempted {
            if let Err(e) = self.client.close().await {
                warn!("Session {}: closing meeting client failed: {:#}", self.id, e);
            }
        }

        let record = self.status.get().await;
        let (_, delivery) = self.backends.notifier.notify(&record).await;
        if tokio::time::timeout(self.settings.notify_timeout, delivery)
            .await
            .is_err()
        {
            warn!(
                "Session {}: completion hooks still running, continuing in background",
                self.id
            );
        }

        if let Some(sink) = sink {
            if let Err(e) = self.backends.sinks.release(&sink).await {
                error!(
                    "Session {}: releasing audio sink {} failed: {:#}",
                    self.id, sink.name, e
                );
            }
        }

        self.status.finish_stopping().await;
        info!("Session {} cleanup complete", self.id);
    }

    fn artifact_path(&self) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.settings
            .recordings_dir
            .join(format!("{}_{}.wav", self.id, timestamp))
    }
}

/// Runs the presence monitor next to a capture health check and turns an
/// autonomous exit into a stop or failure.
async fn watch_session(
    monitor: PresenceMonitor,
    capture: Arc<dyn AudioCapture>,
    controller: Weak<SessionController>,
    settings: MonitorSettings,
) {
    let exit = tokio::select! {
        biased;
        exit = monitor.run() => Some(exit),
        _ = capture_stalled(capture.as_ref(), settings.poll_interval) => None,
    };

    let Some(controller) = controller.upgrade() else {
        return;
    };
    let reason = match exit {
        Some(MonitorExit::Cancelled) => return,
        Some(MonitorExit::NotAdmitted) => SessionError::AdmissionTimeout {
            wait: settings.lobby_wait,
        }
        .to_string(),
        Some(MonitorExit::Alone) => ALONE_REASON.to_string(),
        None => {
            controller.capture_lost().await;
            return;
        }
    };
    if let Err(e) = controller.request_stop(Some(reason)).await {
        debug!("Session {}: autonomous stop skipped: {}", controller.id, e);
    }
}

/// Resolves once the capture reports it is no longer writing.
async fn capture_stalled(capture: &dyn AudioCapture, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !capture.is_active() {
            return;
        }
    }
}
