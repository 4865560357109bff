//! Audio capture abstraction for the per-session recording task.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::sink::AudioSink;

/// A capture task that streams one audio source into an artifact file.
///
/// `start` returns once samples are flowing; `stop` returns once the
/// artifact is finalized on disk.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Start writing audio to `output`.
    async fn start(&self, output: &Path) -> Result<()>;

    /// Stop capturing and finalize the artifact.
    async fn stop(&self) -> Result<()>;

    /// Whether this capture is currently writing.
    fn is_active(&self) -> bool;
}

/// Creates a capture bound to a session's audio sink.
pub trait CaptureFactory: Send + Sync {
    fn create(&self, sink: &AudioSink) -> Box<dyn AudioCapture>;
}
