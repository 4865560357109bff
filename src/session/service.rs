//! Request-facing session operations.
//!
//! `SessionService` is what the HTTP layer talks to: it builds controllers,
//! keeps them in the registry, and runs `start()` in the background so a
//! join request is accepted without waiting for the meeting.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::controller::{SessionBackends, SessionController, SessionSettings};
use super::error::{SessionError, SessionResult};
use super::registry::SessionRegistry;
use super::state::{SessionId, SessionPhase, SessionRecord};

#[derive(Clone)]
pub struct SessionService {
    registry: Arc<SessionRegistry>,
    backends: SessionBackends,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(backends: SessionBackends, settings: SessionSettings) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            backends,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Register a new session and start it in the background.
    pub async fn create_session(
        &self,
        meeting_url: String,
        display_name: String,
    ) -> SessionResult<SessionRecord> {
        let controller = SessionController::new(
            meeting_url,
            display_name,
            self.backends.clone(),
            self.settings.clone(),
        );
        self.registry.insert(controller.clone()).await?;

        let starter = controller.clone();
        tokio::spawn(async move {
            match starter.start().await {
                Ok(()) => {}
                Err(e) if e.is_benign() => {
                    info!("Session {}: start ended early: {}", starter.id(), e)
                }
                Err(e) => error!("Session {}: failed to start: {}", starter.id(), e),
            }
        });

        let mut record = controller.status().await;
        if record.phase == SessionPhase::Idle {
            // start() is already scheduled.
            record.phase = SessionPhase::Joining;
        }
        Ok(record)
    }

    /// Stop a session, remove it from the registry and return its final record.
    ///
    /// Stop and removal run on their own task, so a caller that goes away
    /// mid-request does not leave the session half torn down.
    pub async fn stop_session(&self, id: &SessionId) -> SessionResult<SessionRecord> {
        let controller = self.registry.get(id).await?;
        let registry = self.registry.clone();
        let stopping = tokio::spawn(async move {
            if let Err(e) = controller.stop().await {
                if !e.is_benign() {
                    return Err(e);
                }
                info!("Session {}: {}", controller.id(), e);
            }
            registry.remove(controller.id()).await;
            Ok(controller.status().await)
        });
        stopping.await.unwrap_or_else(|e| {
            error!("Session {}: stop task failed: {}", id, e);
            Err(SessionError::Aborted(id.to_string()))
        })
    }

    pub async fn get_status(&self, id: &SessionId) -> SessionResult<SessionRecord> {
        Ok(self.registry.get(id).await?.status().await)
    }

    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut records = Vec::new();
        for controller in self.registry.list().await {
            records.push(controller.status().await);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Stop every registered session concurrently and empty the registry.
    pub async fn shutdown(&self) {
        let sessions = self.registry.list().await;
        if sessions.is_empty() {
            return;
        }
        info!("Stopping {} active session(s)", sessions.len());

        let mut stops = JoinSet::new();
        for controller in sessions {
            let registry = self.registry.clone();
            stops.spawn(async move {
                if let Err(e) = controller.stop().await {
                    if !e.is_benign() {
                        warn!("Session {}: stop during shutdown failed: {}", controller.id(), e);
                    }
                }
                registry.remove(controller.id()).await;
            });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                error!("Session stop task panicked: {}", e);
            }
        }
    }

    /// Periodically evict finished sessions older than `retention`.
    pub fn spawn_reaper(
        &self,
        every: Duration,
        retention: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.evict_terminal(retention).await;
                    }
                }
            }
        })
    }
}
