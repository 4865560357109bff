//! Per-session virtual audio sinks.
//!
//! Each session routes the browser's output into its own PulseAudio null
//! sink and records from that sink's monitor source, so concurrent sessions
//! never hear each other.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{info, warn};

use crate::session::SessionId;

/// An allocated sink and the monitor source that captures it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSink {
    pub name: String,
    pub monitor: String,
    /// Loaded PulseAudio module, if this sink owns one.
    pub module_id: Option<u32>,
}

impl AudioSink {
    pub fn shared(name: &str) -> Self {
        Self {
            name: name.to_string(),
            monitor: format!("{}.monitor", name),
            module_id: None,
        }
    }
}

#[async_trait]
pub trait SinkAllocator: Send + Sync {
    async fn allocate(&self, session_id: &SessionId) -> Result<AudioSink>;

    async fn release(&self, sink: &AudioSink) -> Result<()>;
}

/// Creates a dedicated `module-null-sink` per session via `pactl`.
pub struct PulseSinkAllocator {
    prefix: String,
    counter: AtomicU64,
}

impl PulseSinkAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_name(&self) -> (u64, String) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        (n, format!("{}_{}", self.prefix, n))
    }
}

#[async_trait]
impl SinkAllocator for PulseSinkAllocator {
    async fn allocate(&self, session_id: &SessionId) -> Result<AudioSink> {
        let (n, name) = self.next_name();
        info!("Creating audio sink '{}' for session {}", name, session_id);

        let output = Command::new("pactl")
            .arg("load-module")
            .arg("module-null-sink")
            .arg(format!("sink_name={}", name))
            .arg(format!(
                "sink_properties=device.description=Meetrec_Session_{}",
                n
            ))
            .output()
            .await
            .context("Failed to execute pactl. Is PulseAudio running?")?;

        if !output.status.success() {
            bail!(
                "Failed to create audio sink {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let module_id = parse_module_index(&String::from_utf8_lossy(&output.stdout))?;
        let sink = AudioSink {
            monitor: format!("{}.monitor", name),
            name,
            module_id: Some(module_id),
        };
        info!(
            "Audio sink created: {} -> {} (module {})",
            sink.name, sink.monitor, module_id
        );
        Ok(sink)
    }

    async fn release(&self, sink: &AudioSink) -> Result<()> {
        let Some(module_id) = sink.module_id else {
            return Ok(());
        };

        let output = Command::new("pactl")
            .arg("unload-module")
            .arg(module_id.to_string())
            .output()
            .await
            .context("Failed to execute pactl unload-module")?;

        if !output.status.success() {
            bail!(
                "Failed to unload audio sink {} (module {}): {}",
                sink.name,
                module_id,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!("Unloaded audio sink {} (module {})", sink.name, module_id);
        Ok(())
    }
}

/// Hands every session the same pre-existing sink. Nothing is created or
/// released.
pub struct SharedSinkAllocator {
    sink: AudioSink,
}

impl SharedSinkAllocator {
    pub fn new(sink_name: &str) -> Self {
        warn!(
            "Session audio isolation disabled; all sessions record from {}",
            sink_name
        );
        Self {
            sink: AudioSink::shared(sink_name),
        }
    }
}

#[async_trait]
impl SinkAllocator for SharedSinkAllocator {
    async fn allocate(&self, _session_id: &SessionId) -> Result<AudioSink> {
        Ok(self.sink.clone())
    }

    async fn release(&self, _sink: &AudioSink) -> Result<()> {
        Ok(())
    }
}

/// `pactl load-module` prints the new module's index on stdout.
fn parse_module_index(stdout: &str) -> Result<u32> {
    stdout
        .trim()
        .parse::<u32>()
        .with_context(|| format!("Unexpected pactl output: {:?}", stdout.trim()))
}
