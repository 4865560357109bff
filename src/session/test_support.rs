//! In-memory collaborators for session tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::controller::{SessionBackends, SessionController, SessionSettings};
use super::monitor::MonitorSettings;
use super::state::{SessionId, SessionPhase};
use crate::audio::{AudioCapture, AudioSink, CaptureFactory, SinkAllocator};
use crate::client::{
    JoinOutcome, JoinRequest, MeetingClient, MeetingClientFactory, ParticipantCount, Presence,
};
use crate::notify::{ArtifactStore, CompletionHook, CompletionNotifier, CompletionPayload};

/// Shared, ordered log of collaborator calls.
pub type Events = Arc<Mutex<Vec<&'static str>>>;

fn record(events: &Events, event: &'static str) {
    events.lock().unwrap().push(event);
}

pub fn lobby() -> Option<Presence> {
    Some(Presence::new(false, ParticipantCount::Unknown))
}

pub fn inside(count: i64) -> Option<Presence> {
    Some(Presence::new(true, ParticipantCount::from_raw(count)))
}

pub struct FakeClient {
    admitted: bool,
    join_error: Option<String>,
    join_delay: Duration,
    presence_delay: Duration,
    fail_leave: bool,
    readings: Mutex<VecDeque<Option<Presence>>>,
    presence_reads: AtomicUsize,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    closes: AtomicUsize,
    events: Events,
}

impl FakeClient {
    fn scripted(admitted: bool, readings: Vec<Option<Presence>>) -> Self {
        Self {
            admitted,
            join_error: None,
            join_delay: Duration::ZERO,
            presence_delay: Duration::ZERO,
            fail_leave: false,
            readings: Mutex::new(readings.into()),
            presence_reads: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            events: Events::default(),
        }
    }

    pub fn admitted(readings: Vec<Option<Presence>>) -> Self {
        Self::scripted(true, readings)
    }

    pub fn lobby(readings: Vec<Option<Presence>>) -> Self {
        Self::scripted(false, readings)
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            join_error: Some(reason.to_string()),
            ..Self::scripted(false, vec![lobby()])
        }
    }

    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay = delay;
        self
    }

    /// Every presence read stalls this long before answering.
    pub fn with_presence_delay(mut self, delay: Duration) -> Self {
        self.presence_delay = delay;
        self
    }

    pub fn with_failing_leave(mut self) -> Self {
        self.fail_leave = true;
        self
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn presence_reads(&self) -> usize {
        self.presence_reads.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeetingClient for FakeClient {
    async fn join(&self, _request: &JoinRequest) -> Result<JoinOutcome> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if !self.join_delay.is_zero() {
            tokio::time::sleep(self.join_delay).await;
        }
        if let Some(reason) = &self.join_error {
            bail!("{}", reason);
        }
        record(&self.events, "join");
        Ok(JoinOutcome {
            admitted: self.admitted,
        })
    }

    async fn presence(&self) -> Result<Presence> {
        self.presence_reads.fetch_add(1, Ordering::SeqCst);
        if !self.presence_delay.is_zero() {
            tokio::time::sleep(self.presence_delay).await;
        }
        let mut readings = self.readings.lock().unwrap();
        let reading = if readings.len() > 1 {
            readings.pop_front().flatten()
        } else {
            readings.front().copied().flatten()
        };
        match reading {
            Some(presence) => Ok(presence),
            None => bail!("roster not visible"),
        }
    }

    async fn leave(&self) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "leave");
        if self.fail_leave {
            bail!("leave button not found");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "close");
        Ok(())
    }
}

struct SharedClientFactory(Arc<FakeClient>);

impl MeetingClientFactory for SharedClientFactory {
    fn create(&self, _session_id: &SessionId) -> Arc<dyn MeetingClient> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct CaptureProbe {
    fail_start: AtomicBool,
    start_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    active: AtomicBool,
    events: Events,
}

impl CaptureProbe {
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    /// Simulates the stream dying mid-recording.
    pub fn interrupt(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_active_now(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct FakeCapture(Arc<CaptureProbe>);

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn start(&self, _output: &Path) -> Result<()> {
        let delay = *self.0.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.0.fail_start.load(Ordering::SeqCst) {
            bail!("no monitor device");
        }
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        self.0.active.store(true, Ordering::SeqCst);
        record(&self.0.events, "capture_start");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let delay = *self.0.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        self.0.active.store(false, Ordering::SeqCst);
        record(&self.0.events, "capture_stop");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }
}

struct FakeCaptureFactory(Arc<CaptureProbe>);

impl CaptureFactory for FakeCaptureFactory {
    fn create(&self, _sink: &AudioSink) -> Box<dyn AudioCapture> {
        Box::new(FakeCapture(self.0.clone()))
    }
}

#[derive(Default)]
pub struct FakeSinks {
    fail: AtomicBool,
    allocated: AtomicUsize,
    released: AtomicUsize,
    events: Events,
}

impl FakeSinks {
    pub fn fail_allocation(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkAllocator for FakeSinks {
    async fn allocate(&self, session_id: &SessionId) -> Result<AudioSink> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("pactl not available");
        }
        self.allocated.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "sink_allocate");
        Ok(AudioSink::shared(&format!("test_sink_{}", session_id)))
    }

    async fn release(&self, _sink: &AudioSink) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "sink_release");
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHook {
    seen: Mutex<Vec<CompletionPayload>>,
    events: Events,
}

impl RecordingHook {
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<CompletionPayload> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, payload: &CompletionPayload) -> Result<()> {
        self.seen.lock().unwrap().push(payload.clone());
        record(&self.events, "notify");
        Ok(())
    }
}

/// Keeps the capture path as the final location without touching disk.
struct PathStore;

#[async_trait]
impl ArtifactStore for PathStore {
    async fn store(&self, _session_id: &str, artifact: &Path) -> Result<String> {
        Ok(artifact.to_string_lossy().to_string())
    }
}

pub struct Harness {
    pub client: Arc<FakeClient>,
    pub capture: Arc<CaptureProbe>,
    pub sinks: Arc<FakeSinks>,
    pub hook: Arc<RecordingHook>,
    pub events: Events,
    pub backends: SessionBackends,
    pub settings: SessionSettings,
}

impl Harness {
    pub fn new(client: FakeClient) -> Self {
        Self::with_lobby_wait(client, Duration::from_secs(600))
    }

    pub fn with_lobby_wait(mut client: FakeClient, lobby_wait: Duration) -> Self {
        let events = Events::default();
        client.events = events.clone();
        let client = Arc::new(client);
        let capture = Arc::new(CaptureProbe {
            events: events.clone(),
            ..Default::default()
        });
        let sinks = Arc::new(FakeSinks {
            events: events.clone(),
            ..Default::default()
        });
        let hook = Arc::new(RecordingHook {
            events: events.clone(),
            ..Default::default()
        });

        let notifier = CompletionNotifier::new(Box::new(PathStore)).with_hook(hook.clone());
        let backends = SessionBackends {
            clients: Arc::new(SharedClientFactory(client.clone())),
            captures: Arc::new(FakeCaptureFactory(capture.clone())),
            sinks: sinks.clone(),
            notifier: Arc::new(notifier),
        };
        let settings = SessionSettings {
            monitor: MonitorSettings {
                poll_interval: Duration::from_secs(1),
                lobby_wait,
                alone_grace: Duration::ZERO,
            },
            capture_stop_timeout: Duration::from_secs(5),
            monitor_stop_timeout: Duration::from_secs(3),
            leave_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(30),
            recordings_dir: std::env::temp_dir().join("meetrec-test"),
        };

        Self {
            client,
            capture,
            sinks,
            hook,
            events,
            backends,
            settings,
        }
    }

    pub fn session(&self) -> Arc<SessionController> {
        SessionController::new(
            "https://meet.example/abc".to_string(),
            "Recorder".to_string(),
            self.backends.clone(),
            self.settings.clone(),
        )
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

/// Polls until the session reaches `phase`; panics after ten simulated minutes.
pub async fn wait_for_phase(session: &SessionController, phase: SessionPhase) {
    for _ in 0..6000 {
        if session.phase().await == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "session {} never reached {}, stuck in {}",
        session.id(),
        phase,
        session.phase().await
    );
}
