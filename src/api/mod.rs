//! REST API server for meetrec.
//!
//! Provides HTTP endpoints for:
//! - Service info and version
//! - Joining meetings and stopping sessions
//! - Session status and listing
//! - Recording downloads

pub mod error;
pub mod routes;

use crate::config::ServerConfig;
use crate::session::SessionService;
use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::future::Future;
use tracing::info;

pub use routes::sessions::SessionState;

pub struct ApiServer {
    host: String,
    port: u16,
    state: SessionState,
}

impl ApiServer {
    pub fn new(service: SessionService, config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            state: SessionState { service },
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET    /              - Service info");
        info!("  GET    /version       - Version info");
        info!("  POST   /join          - Join a meeting and record it");
        info!("  POST   /stop/:id      - Stop a session");
        info!("  GET    /status/:id    - Get session status");
        info!("  GET    /sessions      - List sessions");
        info!("  GET    /download/:id  - Download a recording");
        info!("  DELETE /session/:id   - Force-remove a session");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Build the full application router.
pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/version", get(version))
        .with_state(state.clone())
        .merge(routes::sessions::router(state))
}

async fn status(State(state): State<SessionState>) -> Json<Value> {
    Json(json!({
        "service": "meetrec",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "active_sessions": state.service.registry().len().await,
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetrec"
    }))
}
