//! Completion hook abstraction and shell command implementation.
//!
//! When a session ends, each configured hook receives the completion
//! payload (e.g. to kick off transcription or file the recording).

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::CompletionPayload;

/// Environment variable names for session metadata passed to shell hooks.
pub mod hook_env {
    pub const SESSION_ID: &str = "MEETREC_SESSION_ID";
    pub const MEETING_URL: &str = "MEETREC_MEETING_URL";
    pub const FILE_LOCATION: &str = "MEETREC_FILE_LOCATION";
    pub const STARTED_AT: &str = "MEETREC_STARTED_AT";
    pub const STOPPED_AT: &str = "MEETREC_STOPPED_AT";
}

/// Post-session processing hook.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, payload: &CompletionPayload) -> Result<()>;
}

/// Executes a shell command with session data.
/// - Pipes the payload JSON to stdin
/// - Sets environment variables for session metadata
/// - Kills process on timeout
/// - Non-zero exit code logs warning but does not fail
pub struct ShellCommandHook {
    command: String,
    timeout: Duration,
}

impl ShellCommandHook {
    pub fn new(command: String, timeout_seconds: u64) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

#[async_trait]
impl CompletionHook for ShellCommandHook {
    fn name(&self) -> &str {
        "post_command"
    }

    async fn execute(&self, payload: &CompletionPayload) -> Result<()> {
        info!(
            "Running post-session hook for session {}: {}",
            payload.session_id, self.command
        );

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(hook_env::SESSION_ID, &payload.session_id)
            .env(hook_env::MEETING_URL, &payload.meeting_url)
            .env(hook_env::FILE_LOCATION, &payload.file_location)
            .env(hook_env::STARTED_AT, payload.started_at_rfc3339())
            .env(hook_env::STOPPED_AT, payload.stopped_at_rfc3339())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let body = serde_json::to_vec(payload)?;
            let _ = stdin.write_all(&body).await;
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if !stdout.is_empty() {
                        info!("Post-session hook stdout: {}", stdout.trim());
                    }
                    info!("Post-session hook completed successfully");
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(
                        "Post-session hook exited with status {}: {}",
                        output.status,
                        stderr.trim()
                    );
                }
            }
            Ok(Err(e)) => {
                warn!("Post-session hook failed to execute: {}", e);
            }
            Err(_) => {
                warn!(
                    "Post-session hook timed out after {}s (process will be killed)",
                    self.timeout.as_secs()
                );
            }
        }

        Ok(())
    }
}
