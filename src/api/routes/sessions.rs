//! Session API endpoints.
//!
//! Provides HTTP endpoints for:
//! - Joining a meeting and recording it (POST /join)
//! - Stopping a session (POST /stop/:id)
//! - Session status (GET /status/:id)
//! - Listing sessions (GET /sessions)
//! - Downloading a recording (GET /download/:id)
//! - Force-removing a session (DELETE /session/:id)

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::session::{SessionId, SessionRecord, SessionService};

const MAX_DISPLAY_NAME: usize = 100;

/// Shared state for session routes.
#[derive(Clone)]
pub struct SessionState {
    pub service: SessionService,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub meeting_url: String,
    pub display_name: String,
}

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/join", post(join_meeting))
        .route("/stop/:id", post(stop_session))
        .route("/status/:id", get(session_status))
        .route("/sessions", get(list_sessions))
        .route("/download/:id", get(download_recording))
        .route("/session/:id", delete(delete_session))
        .with_state(state)
}

fn session_json(record: &SessionRecord) -> Value {
    json!({
        "session_id": record.session_id,
        "meeting_url": record.meeting_url,
        "display_name": record.display_name,
        "status": record.phase,
        "started_at": record.started_at,
        "stopped_at": record.stopped_at,
        "recording_file": record.recording_file,
        "error_message": record.error_message,
    })
}

async fn join_meeting(
    State(state): State<SessionState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Json<Value>> {
    let meeting_url = request.meeting_url.trim().to_string();
    if !(meeting_url.starts_with("https://") || meeting_url.starts_with("http://")) {
        return Err(ApiError::bad_request("meeting_url must be an http(s) URL"));
    }
    let display_name = request.display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME {
        return Err(ApiError::bad_request(format!(
            "display_name must be 1-{} characters",
            MAX_DISPLAY_NAME
        )));
    }

    let record = state
        .service
        .create_session(meeting_url, display_name)
        .await?;
    info!("Join requested for session {}", record.session_id);

    Ok(Json(json!({
        "success": true,
        "message": format!("Bot joining with session ID: {}", record.session_id),
        "session": session_json(&record),
    })))
}

async fn stop_session(
    State(state): State<SessionState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state.service.stop_session(&SessionId::from(id)).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Recording stopped for {}", record.session_id),
        "session": session_json(&record),
    })))
}

async fn session_status(
    State(state): State<SessionState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state.service.get_status(&SessionId::from(id)).await?;

    Ok(Json(json!({
        "session_id": record.session_id,
        "status": record.phase,
        "uptime_seconds": record.uptime_seconds(),
        "recording_duration_seconds": record.recording_duration_seconds(),
        "admitted": record.admitted,
        "participant_count": record.participant_count,
        "recording_file": record.recording_file,
        "error_message": record.error_message,
    })))
}

async fn list_sessions(State(state): State<SessionState>) -> Json<Value> {
    let records = state.service.list_sessions().await;
    let sessions: Vec<Value> = records
        .iter()
        .map(|record| {
            json!({
                "session_id": record.session_id,
                "display_name": record.display_name,
                "status": record.phase,
                "uptime_seconds": record.uptime_seconds(),
            })
        })
        .collect();

    Json(json!({
        "active_sessions": sessions.len(),
        "sessions": sessions,
    }))
}

async fn delete_session(
    State(state): State<SessionState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state.service.stop_session(&SessionId::from(id)).await?;

    Ok(Json(json!({
        "message": format!("Session {} deleted", record.session_id),
    })))
}

async fn download_recording(
    State(state): State<SessionState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let path = find_recording(&state, &id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Recording for {} not found", id)))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open recording: {}", e)))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("{}.wav", id));

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// The registered session's file if it exists, else a `<id>*.wav` file in
/// the recordings directory.
async fn find_recording(state: &SessionState, id: &str) -> Option<PathBuf> {
    if let Ok(record) = state.service.get_status(&SessionId::from(id)).await {
        if let Some(file) = record.recording_file {
            if tokio::fs::try_exists(&file).await.unwrap_or(false) {
                return Some(file);
            }
        }
    }

    let dir = &state.service.settings().recordings_dir;
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(id) && name.ends_with(".wav") {
            return Some(entry.path());
        }
    }
    None
}
