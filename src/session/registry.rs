//! Session registry.
//!
//! Maps session ids to their controllers. The registry only looks sessions
//! up; all state changes go through the controller itself.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::controller::SessionController;
use super::error::{SessionError, SessionResult};
use super::state::SessionId;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionController>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`SessionError::Duplicate`] if the id is already present.
    pub async fn insert(&self, controller: Arc<SessionController>) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        let id = controller.id().clone();
        if sessions.contains_key(&id) {
            return Err(SessionError::Duplicate(id.to_string()));
        }
        sessions.insert(id.clone(), controller);
        debug!("Registered session {} ({} active)", id, sessions.len());
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> SessionResult<Arc<SessionController>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::not_found(id.as_str()))
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionController>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            debug!("Removed session {}", id);
        }
        removed
    }

    pub async fn list(&self) -> Vec<Arc<SessionController>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove terminal sessions that ended more than `retention` ago.
    /// Returns how many were evicted.
    pub async fn evict_terminal(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let now = Utc::now();

        let mut expired = Vec::new();
        for controller in self.list().await {
            let record = controller.status().await;
            let ended_long_ago = record
                .stopped_at
                .map(|stopped| now - stopped >= retention)
                .unwrap_or(false);
            if record.phase.is_terminal() && ended_long_ago {
                expired.push(record.session_id);
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
        }
        info!("Evicted {} finished session(s)", expired.len());
        expired.len()
    }
}
