//! CLI handler for session commands.
//!
//! All commands talk to a running service over its HTTP API.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::cli::args::{SessionCliArgs, SessionCommand};

pub async fn handle_session_command(args: SessionCliArgs) -> Result<()> {
    let api = SessionApi::new(&args.url);
    match args.command {
        SessionCommand::Join { meeting_url, name } => join(&api, meeting_url, name).await,
        SessionCommand::Stop { id } => stop(&api, &id).await,
        SessionCommand::Status { id } => status(&api, &id).await,
        SessionCommand::List => list(&api).await,
    }
}

struct SessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl SessionApi {
    fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .context("Failed to connect to meetrec service. Is it running?")?;

        let status = response.status();
        let json: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            bail!("Failed to {}: {}", action, error_message(&json));
        }
        Ok(json)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn error_message(json: &Value) -> &str {
    json.get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
}

fn str_field<'a>(json: &'a Value, key: &str) -> &'a str {
    json.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

async fn join(api: &SessionApi, meeting_url: String, name: String) -> Result<()> {
    let request = api.client.post(api.url("/join")).json(&json!({
        "meeting_url": meeting_url,
        "display_name": name,
    }));
    let json = api.send(request, "join meeting").await?;

    let session = &json["session"];
    println!("Session started (id: {})", str_field(session, "session_id"));
    println!("Status: {}", str_field(session, "status"));
    Ok(())
}

async fn stop(api: &SessionApi, id: &str) -> Result<()> {
    let request = api.client.post(api.url(&format!("/stop/{}", id)));
    let json = api.send(request, "stop session").await?;

    let session = &json["session"];
    println!(
        "Session {} {}",
        str_field(session, "session_id"),
        str_field(session, "status")
    );
    if let Some(file) = session.get("recording_file").and_then(|v| v.as_str()) {
        println!("Recording: {}", file);
    }
    if let Some(error) = session.get("error_message").and_then(|v| v.as_str()) {
        println!("Note: {}", error);
    }
    Ok(())
}

async fn status(api: &SessionApi, id: &str) -> Result<()> {
    let request = api.client.get(api.url(&format!("/status/{}", id)));
    let json = api.send(request, "get status").await?;

    println!("Session:   {}", str_field(&json, "session_id"));
    println!("Status:    {}", str_field(&json, "status"));
    println!(
        "Admitted:  {}",
        json.get("admitted").and_then(|v| v.as_bool()).unwrap_or(false)
    );
    if let Some(count) = json.get("participant_count").and_then(|v| v.as_u64()) {
        println!("Participants: {}", count);
    }
    if let Some(uptime) = json.get("uptime_seconds").and_then(|v| v.as_f64()) {
        println!("Uptime:    {:.0}s", uptime);
    }
    if let Some(duration) = json
        .get("recording_duration_seconds")
        .and_then(|v| v.as_f64())
    {
        println!("Recorded:  {:.0}s", duration);
    }
    if let Some(file) = json.get("recording_file").and_then(|v| v.as_str()) {
        println!("File:      {}", file);
    }
    if let Some(error) = json.get("error_message").and_then(|v| v.as_str()) {
        println!("Error:     {}", error);
    }
    Ok(())
}

async fn list(api: &SessionApi) -> Result<()> {
    let request = api.client.get(api.url("/sessions"));
    let json = api.send(request, "list sessions").await?;

    let sessions = json
        .get("sessions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("{} session(s):\n", sessions.len());
    for session in &sessions {
        let uptime = session
            .get("uptime_seconds")
            .and_then(|v| v.as_f64())
            .map(|s| format!("{:.0}s", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<10} {:>8}  {}",
            str_field(session, "session_id"),
            str_field(session, "status"),
            uptime,
            str_field(session, "display_name")
        );
    }
    Ok(())
}
