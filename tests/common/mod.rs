//! Shared fakes for integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meetrec::audio::{AudioCapture, AudioSink, CaptureFactory, SinkAllocator};
use meetrec::client::{
    JoinOutcome, JoinRequest, MeetingClient, MeetingClientFactory, ParticipantCount, Presence,
};
use meetrec::notify::{CompletionHook, CompletionNotifier, CompletionPayload, LocalStore};
use meetrec::session::{
    MonitorSettings, SessionBackends, SessionController, SessionId, SessionPhase, SessionService,
    SessionSettings,
};

pub fn lobby() -> Option<Presence> {
    Some(Presence::new(false, ParticipantCount::Unknown))
}

pub fn inside(count: i64) -> Option<Presence> {
    Some(Presence::new(true, ParticipantCount::from_raw(count)))
}

/// Meeting client that replays presence readings; the last one repeats and
/// `None` is a failed read.
pub struct FakeClient {
    admitted: bool,
    join_error: Option<String>,
    readings: Mutex<VecDeque<Option<Presence>>>,
    pub leaves: AtomicUsize,
}

impl FakeClient {
    fn scripted(admitted: bool, readings: Vec<Option<Presence>>) -> Self {
        Self {
            admitted,
            join_error: None,
            readings: Mutex::new(readings.into()),
            leaves: AtomicUsize::new(0),
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
}

#[async_trait]
impl MeetingClient for FakeClient {
    async fn join(&self, _request: &JoinRequest) -> Result<JoinOutcome> {
        if let Some(reason) = &self.join_error {
            bail!("{}", reason);
        }
        Ok(JoinOutcome {
            admitted: self.admitted,
        })
    }

    async fn presence(&self) -> Result<Presence> {
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
        Ok(())
    }
}

pub struct SharedClientFactory(pub Arc<FakeClient>);

impl MeetingClientFactory for SharedClientFactory {
    fn create(&self, _session_id: &SessionId) -> Arc<dyn MeetingClient> {
        self.0.clone()
    }
}

/// Writes a placeholder artifact on start so downloads and local storage
/// have something to find.
#[derive(Default)]
pub struct FileCaptures {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

struct FileCapture {
    counters: Arc<FileCaptures>,
    active: Mutex<bool>,
}

#[async_trait]
impl AudioCapture for FileCapture {
    async fn start(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"RIFF....WAVE").await?;
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        *self.active.lock().unwrap() = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        *self.active.lock().unwrap() = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        *self.active.lock().unwrap()
    }
}

pub struct FileCaptureFactory(pub Arc<FileCaptures>);

impl CaptureFactory for FileCaptureFactory {
    fn create(&self, _sink: &AudioSink) -> Box<dyn AudioCapture> {
        Box::new(FileCapture {
            counters: self.0.clone(),
            active: Mutex::new(false),
        })
    }
}

#[derive(Default)]
pub struct CountingSinks {
    pub allocated: AtomicUsize,
    pub released: AtomicUsize,
}

#[async_trait]
impl SinkAllocator for CountingSinks {
    async fn allocate(&self, session_id: &SessionId) -> Result<AudioSink> {
        let n = self.allocated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AudioSink::shared(&format!("it_sink_{}_{}", n, session_id)))
    }

    async fn release(&self, _sink: &AudioSink) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingHook {
    pub payloads: Mutex<Vec<CompletionPayload>>,
}

impl CollectingHook {
    pub fn count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionHook for CollectingHook {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn execute(&self, payload: &CompletionPayload) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

pub struct TestEnv {
    pub service: SessionService,
    pub client: Arc<FakeClient>,
    pub captures: Arc<FileCaptures>,
    pub sinks: Arc<CountingSinks>,
    pub hook: Arc<CollectingHook>,
    pub recordings: tempfile::TempDir,
}

impl TestEnv {
    pub fn new(client: FakeClient, lobby_wait: Duration) -> Self {
        Self::with_client(Arc::new(client), lobby_wait)
    }

    pub fn with_client(client: Arc<FakeClient>, lobby_wait: Duration) -> Self {
        let recordings = tempfile::tempdir().unwrap();
        let captures = Arc::new(FileCaptures::default());
        let sinks = Arc::new(CountingSinks::default());
        let hook = Arc::new(CollectingHook::default());

        let backends = SessionBackends {
            clients: Arc::new(SharedClientFactory(client.clone())),
            captures: Arc::new(FileCaptureFactory(captures.clone())),
            sinks: sinks.clone(),
            notifier: Arc::new(CompletionNotifier::new(Box::new(LocalStore)).with_hook(hook.clone())),
        };
        let settings = SessionSettings {
            monitor: MonitorSettings {
                poll_interval: Duration::from_millis(20),
                lobby_wait,
                alone_grace: Duration::ZERO,
            },
            capture_stop_timeout: Duration::from_secs(2),
            monitor_stop_timeout: Duration::from_secs(1),
            leave_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(2),
            recordings_dir: recordings.path().to_path_buf(),
        };

        Self {
            service: SessionService::new(backends, settings),
            client,
            captures,
            sinks,
            hook,
            recordings,
        }
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings.path().to_path_buf()
    }
}

pub async fn wait_for_phase(session: &SessionController, phase: SessionPhase) {
    for _ in 0..500 {
        if session.phase().await == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session {} stuck in {}, expected {}",
        session.id(),
        session.phase().await,
        phase
    );
}

/// Capture starts just after the session enters `recording`.
pub async fn wait_for_recording_file(session: &SessionController) -> PathBuf {
    for _ in 0..500 {
        if let Some(file) = session.status().await.recording_file {
            return file;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never started recording", session.id());
}
