pub mod audio_source;
pub mod monitor_capture;
pub mod sink;

pub use audio_source::{AudioCapture, CaptureFactory};
pub use monitor_capture::{CaptureFormat, MonitorCapture, MonitorCaptureFactory};
pub use sink::{AudioSink, PulseSinkAllocator, SharedSinkAllocator, SinkAllocator};
