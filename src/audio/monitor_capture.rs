//! Meeting audio capture from a sink's monitor source.
//!
//! The cpal stream is not `Send`, so each capture owns a dedicated thread
//! that opens the device, writes samples straight into a WAV file and
//! finalizes it when asked to stop.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::audio_source::{AudioCapture, CaptureFactory};
use super::sink::AudioSink;

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

#[derive(Debug, Clone, Copy)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    done_rx: oneshot::Receiver<Result<()>>,
}

pub struct MonitorCapture {
    monitor: String,
    format: CaptureFormat,
    active: Arc<AtomicBool>,
    worker: tokio::sync::Mutex<Option<CaptureWorker>>,
}

impl MonitorCapture {
    pub fn new(monitor: impl Into<String>, format: CaptureFormat) -> Self {
        Self {
            monitor: monitor.into(),
            format,
            active: Arc::new(AtomicBool::new(false)),
            worker: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioCapture for MonitorCapture {
    async fn start(&self, output: &Path) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            bail!("Capture from {} already running", self.monitor);
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).context("Failed to create recordings directory")?;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let monitor = self.monitor.clone();
        let format = self.format;
        let output = output.to_path_buf();
        let active = self.active.clone();

        std::thread::Builder::new()
            .name(format!("capture-{}", monitor))
            .spawn(move || {
                run_capture(monitor, format, output, active, stop_rx, ready_tx, done_tx)
            })
            .context("Failed to spawn capture thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Capture thread exited during startup"))??;

        *worker = Some(CaptureWorker { stop_tx, done_rx });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            debug!("Capture from {} was not running", self.monitor);
            return Ok(());
        };

        let _ = worker.stop_tx.send(());
        worker
            .done_rx
            .await
            .map_err(|_| anyhow!("Capture thread exited without finalizing"))?
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

fn run_capture(
    monitor: String,
    format: CaptureFormat,
    output: PathBuf,
    active: Arc<AtomicBool>,
    stop_rx: mpsc::Receiver<()>,
    ready_tx: oneshot::Sender<Result<()>>,
    done_tx: oneshot::Sender<Result<()>>,
) {
    let (stream, writer) = match open_stream(&monitor, format, &output, active.clone()) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    active.store(true, Ordering::SeqCst);
    info!("Recording {} -> {:?}", monitor, output);
    let _ = ready_tx.send(Ok(()));

    // Returns on stop or when the capture handle is dropped.
    let _ = stop_rx.recv();

    drop(stream);
    active.store(false, Ordering::SeqCst);

    let result = finalize(&writer);
    match &result {
        Ok(()) => info!("Recording saved to {:?}", output),
        Err(e) => error!("Failed to finalize recording {:?}: {}", output, e),
    }
    let _ = done_tx.send(result);
}

fn open_stream(
    monitor: &str,
    format: CaptureFormat,
    output: &Path,
    active: Arc<AtomicBool>,
) -> Result<(cpal::Stream, SharedWriter)> {
    let device = find_monitor_device(monitor)?;

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer: SharedWriter = Arc::new(Mutex::new(Some(
        WavWriter::create(output, spec)
            .with_context(|| format!("Failed to create {:?}", output))?,
    )));

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let writer_clone = writer.clone();
    let write_failed = active.clone();
    let err_fn = stream_error_handler(monitor.to_string(), active);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut guard) = writer_clone.lock() {
                    if let Some(writer) = guard.as_mut() {
                        for &sample in data {
                            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            if let Err(e) = writer.write_sample(value) {
                                if write_failed.swap(false, Ordering::SeqCst) {
                                    error!("Writing captured audio failed: {}", e);
                                }
                                break;
                            }
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .context("Failed to build capture stream")?;

    stream.play().context("Failed to start capture stream")?;
    Ok((stream, writer))
}

/// A failed stream stops producing samples, so the capture is no longer active.
fn stream_error_handler(
    monitor: String,
    active: Arc<AtomicBool>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!("Capture stream error on {}: {}", monitor, err);
        active.store(false, Ordering::SeqCst);
    }
}

fn find_monitor_device(monitor: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let wanted = monitor.to_lowercase();

    let devices = host
        .input_devices()
        .context("Failed to enumerate audio input devices")?;
    for device in devices {
        if let Ok(name) = device.name() {
            if name.to_lowercase().contains(&wanted) {
                info!("Found capture device for {}: {}", monitor, name);
                return Ok(device);
            }
        }
    }

    warn!(
        "No input device named {}; falling back to the default input",
        monitor
    );
    host.default_input_device()
        .context("No audio input device available")
}

fn finalize(writer: &SharedWriter) -> Result<()> {
    let writer = writer
        .lock()
        .map_err(|_| anyhow!("Capture writer lock poisoned"))?
        .take();
    match writer {
        Some(writer) => writer.finalize().context("Failed to finalize WAV file"),
        None => Ok(()),
    }
}

/// Captures from the monitor of whichever sink the session was given.
pub struct MonitorCaptureFactory {
    format: CaptureFormat,
}

impl MonitorCaptureFactory {
    pub fn new(format: CaptureFormat) -> Self {
        Self { format }
    }
}

impl CaptureFactory for MonitorCaptureFactory {
    fn create(&self, sink: &AudioSink) -> Box<dyn AudioCapture> {
        Box::new(MonitorCapture::new(sink.monitor.clone(), self.format))
    }
}
