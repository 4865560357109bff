//! Completion notification.
//!
//! When a session reaches `stopped` or `failed`, the recording is handed to
//! the configured artifact store and the resulting location is delivered to
//! every completion hook. Failures are logged and never reach the caller.

pub mod hook;
pub mod storage;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::SessionRecord;

pub use hook::{CompletionHook, ShellCommandHook};
pub use storage::{ArtifactStore, HttpObjectStore, LocalStore};
pub use webhook::WebhookHook;

/// Payload describing a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub session_id: String,
    pub meeting_url: String,
    /// Local path or storage URL; empty if recording never started.
    pub file_location: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl CompletionPayload {
    pub fn started_at_rfc3339(&self) -> String {
        self.started_at.map(|t| t.to_rfc3339()).unwrap_or_default()
    }

    pub fn stopped_at_rfc3339(&self) -> String {
        self.stopped_at.map(|t| t.to_rfc3339()).unwrap_or_default()
    }
}

pub struct CompletionNotifier {
    store: Box<dyn ArtifactStore>,
    hooks: Vec<Arc<dyn CompletionHook>>,
    upload_timeout: Duration,
    hook_timeout: Duration,
}

impl CompletionNotifier {
    pub fn new(store: Box<dyn ArtifactStore>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
            upload_timeout: Duration::from_secs(300),
            hook_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Store the artifact, then deliver the payload to every hook on a
    /// detached task. The returned handle completes when delivery is done.
    pub async fn notify(&self, record: &SessionRecord) -> (CompletionPayload, JoinHandle<()>) {
        let file_location = match &record.recording_file {
            Some(path) => {
                match tokio::time::timeout(
                    self.upload_timeout,
                    self.store.store(record.session_id.as_str(), path),
                )
                .await
                {
                    Ok(Ok(location)) => location,
                    Ok(Err(e)) => {
                        warn!(
                            "Session {}: storing recording failed: {:#}",
                            record.session_id, e
                        );
                        path.to_string_lossy().to_string()
                    }
                    Err(_) => {
                        warn!(
                            "Session {}: storing recording timed out after {}s",
                            record.session_id,
                            self.upload_timeout.as_secs()
                        );
                        path.to_string_lossy().to_string()
                    }
                }
            }
            None => String::new(),
        };

        let payload = CompletionPayload {
            session_id: record.session_id.to_string(),
            meeting_url: record.meeting_url.clone(),
            file_location,
            started_at: record.started_at,
            stopped_at: record.stopped_at,
        };

        let hooks = self.hooks.clone();
        let timeout = self.hook_timeout;
        let delivered = payload.clone();
        let delivery = tokio::spawn(async move {
            for hook in hooks {
                match tokio::time::timeout(timeout, hook.execute(&delivered)).await {
                    Ok(Ok(())) => debug!(
                        "Session {}: {} hook delivered",
                        delivered.session_id,
                        hook.name()
                    ),
                    Ok(Err(e)) => warn!(
                        "Session {}: {} hook failed: {:#}",
                        delivered.session_id,
                        hook.name(),
                        e
                    ),
                    Err(_) => warn!(
                        "Session {}: {} hook timed out after {}s",
                        delivered.session_id,
                        hook.name(),
                        timeout.as_secs()
                    ),
                }
            }
        });

        info!(
            "Session {} completion: {}",
            payload.session_id,
            if payload.file_location.is_empty() {
                "no recording"
            } else {
                payload.file_location.as_str()
            }
        );
        (payload, delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionId, SessionRecord};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHook {
        seen: Mutex<Vec<CompletionPayload>>,
    }

    #[async_trait]
    impl CompletionHook for RecordingHook {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute(&self, payload: &CompletionPayload) -> Result<()> {
            self.seen.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl CompletionHook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _payload: &CompletionPayload) -> Result<()> {
            anyhow::bail!("endpoint down")
        }
    }

    fn record() -> SessionRecord {
        let mut record = SessionRecord::new(
            SessionId::from("s-1"),
            "https://meet.example/abc".to_string(),
            "Recorder".to_string(),
        );
        record.started_at = Some(Utc::now());
        record.stopped_at = Some(Utc::now());
        record
    }

    #[test]
    fn test_payload_serialization() {
        let payload = CompletionPayload {
            session_id: "s-1".to_string(),
            meeting_url: "https://meet.example/abc".to_string(),
            file_location: String::new(),
            started_at: None,
            stopped_at: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["file_location"], "");
        assert!(json["stopped_at"].is_null());
        assert_eq!(payload.started_at_rfc3339(), "");
    }

    #[tokio::test]
    async fn test_notify_without_recording() {
        let hook = Arc::new(RecordingHook::default());
        let notifier = CompletionNotifier::new(Box::new(LocalStore))
            .with_hook(Arc::new(FailingHook))
            .with_hook(hook.clone());

        let (payload, delivery) = notifier.notify(&record()).await;
        delivery.await.unwrap();

        assert_eq!(payload.file_location, "");
        let seen = hook.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], payload);
    }

    #[tokio::test]
    async fn test_notify_falls_back_to_local_path() {
        let mut record = record();
        record.recording_file = Some("/nonexistent/s-1.wav".into());
        let notifier = CompletionNotifier::new(Box::new(LocalStore));

        let (payload, delivery) = notifier.notify(&record).await;
        delivery.await.unwrap();
        assert_eq!(payload.file_location, "/nonexistent/s-1.wav");
    }
}
