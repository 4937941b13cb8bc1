//! Microphone capture worker
//!
//! Runs a cpal input stream on a dedicated thread. Samples accumulate into
//! the WAV sink only while recording is toggled on; the second toggle
//! finalizes the file (mono, 16 kHz, 16-bit PCM) and fires the completion
//! event. Device availability is checked before the thread is spawned.

use crate::capture::{CaptureError, CaptureWorker, DeviceClaim, DeviceRegistry, StreamKind};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

type WavSink = WavWriter<BufWriter<File>>;

/// Microphone capture worker
pub struct AudioCaptureWorker {
    output_path: PathBuf,
    sample_rate: u32,
    channels: u16,
    registry: DeviceRegistry,
    running: Arc<AtomicBool>,
    record_requested: Arc<AtomicBool>,
    toggles: u32,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    completion_rx: Option<oneshot::Receiver<Result<PathBuf, CaptureError>>>,
    claim: Option<DeviceClaim>,
}

impl AudioCaptureWorker {
    pub fn new(
        output_path: PathBuf,
        sample_rate: u32,
        channels: u16,
        registry: DeviceRegistry,
    ) -> Self {
        Self {
            output_path,
            sample_rate,
            channels,
            registry,
            running: Arc::new(AtomicBool::new(false)),
            record_requested: Arc::new(AtomicBool::new(false)),
            toggles: 0,
            capture_thread: None,
            completion_rx: None,
            claim: None,
        }
    }

    fn start_sync(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }
        let claim = self.registry.claim("microphone:default")?;

        // Synchronous availability check, before any thread exists
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable("no default input device".to_string())
        })?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let sample_format = device
            .default_input_config()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("no usable input config: {e}"))
            })?
            .sample_format();

        self.claim = Some(claim);
        self.running.store(true, Ordering::SeqCst);
        self.toggles = 0;

        let (completion_tx, completion_rx) = oneshot::channel();
        self.completion_rx = Some(completion_rx);

        let output_path = self.output_path.clone();
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: WavSampleFormat::Int,
        };
        let running = self.running.clone();
        let record_requested = self.record_requested.clone();

        let handle = std::thread::spawn(move || {
            capture_loop(
                output_path,
                config,
                sample_format,
                spec,
                running,
                record_requested,
                completion_tx,
            );
        });
        self.capture_thread = Some(handle);

        tracing::info!(
            "audio capture started on {} ({} Hz, {} ch)",
            device_name,
            self.sample_rate,
            self.channels
        );
        Ok(())
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }
}

/// The microphone thread body. The cpal stream must live on this thread;
/// the data callback appends to the WAV sink only while it is open.
fn capture_loop(
    output_path: PathBuf,
    config: StreamConfig,
    sample_format: SampleFormat,
    spec: WavSpec,
    running: Arc<AtomicBool>,
    record_requested: Arc<AtomicBool>,
    completion_tx: oneshot::Sender<Result<PathBuf, CaptureError>>,
) {
    let mut completion = Some(completion_tx);
    let sink: Arc<Mutex<Option<WavSink>>> = Arc::new(Mutex::new(None));
    let fault: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            if let Some(tx) = completion.take() {
                let _ = tx.send(Err(CaptureError::DeviceIo(
                    "input device disappeared before the stream opened".to_string(),
                )));
            }
            return;
        }
    };

    let stream = {
        let sink = sink.clone();
        let fault = fault.clone();
        let err_fault = fault.clone();
        let on_error = move |e: cpal::StreamError| {
            tracing::error!("audio stream error: {e}");
            *err_fault.lock() = Some(e.to_string());
        };

        let built = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    write_samples_i16(&sink, &fault, data);
                },
                on_error,
                None,
            ),
            _ => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    write_samples_i16(&sink, &fault, &converted);
                },
                on_error,
                None,
            ),
        };
        match built {
            Ok(s) => s,
            Err(e) => {
                if let Some(tx) = completion.take() {
                    let _ = tx.send(Err(CaptureError::DeviceIo(format!(
                        "failed to build input stream: {e}"
                    ))));
                }
                return;
            }
        }
    };

    if let Err(e) = stream.play() {
        if let Some(tx) = completion.take() {
            let _ = tx.send(Err(CaptureError::DeviceIo(format!(
                "failed to start input stream: {e}"
            ))));
        }
        return;
    }

    let mut was_recording = false;
    while running.load(Ordering::SeqCst) {
        if let Some(message) = fault.lock().take() {
            // Mid-capture device failure: discard the partial sink
            *sink.lock() = None;
            if let Some(tx) = completion.take() {
                let _ = tx.send(Err(CaptureError::DeviceIo(message)));
            }
            break;
        }

        let recording = record_requested.load(Ordering::SeqCst);
        if recording && !was_recording {
            if let Some(parent) = output_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match WavWriter::create(&output_path, spec) {
                Ok(writer) => {
                    tracing::info!("wav sink opened -> {:?}", output_path);
                    *sink.lock() = Some(writer);
                }
                Err(e) => {
                    if let Some(tx) = completion.take() {
                        let _ = tx.send(Err(CaptureError::Sink(format!(
                            "failed to open wav sink: {e}"
                        ))));
                    }
                    break;
                }
            }
            was_recording = true;
        } else if !recording && was_recording {
            // Second toggle: close the sink so the file is fully flushed
            // before completion is reported.
            let writer = sink.lock().take();
            let result = match writer {
                Some(writer) => {
                    let frames = writer.len();
                    writer
                        .finalize()
                        .map(|_| {
                            tracing::info!(
                                "wav sink finished: {} samples -> {:?}",
                                frames,
                                output_path
                            );
                            output_path.clone()
                        })
                        .map_err(|e| CaptureError::Sink(format!("failed to finalize wav: {e}")))
                }
                None => Err(CaptureError::Sink("wav sink missing at stop".to_string())),
            };
            if let Some(tx) = completion.take() {
                let _ = tx.send(result);
            }
            break;
        }

        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    running.store(false, Ordering::SeqCst);
    tracing::info!("audio capture thread exited");
}

fn write_samples_i16(
    sink: &Arc<Mutex<Option<WavSink>>>,
    fault: &Arc<Mutex<Option<String>>>,
    data: &[i16],
) {
    let mut guard = sink.lock();
    if let Some(writer) = guard.as_mut() {
        for &sample in data {
            if let Err(e) = writer.write_sample(sample) {
                *fault.lock() = Some(format!("wav write failed: {e}"));
                break;
            }
        }
    }
}

#[async_trait]
impl CaptureWorker for AudioCaptureWorker {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        self.start_sync()
    }

    fn toggle_record(&mut self) -> Result<(), CaptureError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::NotRunning);
        }
        self.toggles += 1;
        let now_recording = self.toggles % 2 == 1;
        self.record_requested.store(now_recording, Ordering::SeqCst);
        tracing::debug!("audio record toggled -> {}", now_recording);
        Ok(())
    }

    async fn wait_finished(&mut self, timeout: Duration) -> Result<PathBuf, CaptureError> {
        let rx = self
            .completion_rx
            .take()
            .ok_or(CaptureError::NotRunning)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                self.join_thread();
                self.claim = None;
                result
            }
            Ok(Err(_)) => {
                self.abort();
                Err(CaptureError::DeviceIo(
                    "audio capture thread exited without reporting".to_string(),
                ))
            }
            Err(_) => {
                self.abort();
                Err(CaptureError::StopTimeout(timeout))
            }
        }
    }

    fn abort(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.record_requested.store(false, Ordering::SeqCst);
        // Bounded teardown: the loop polls its flags every 20ms, so give it
        // a moment and detach rather than risk an unbounded join.
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline {
            match &self.capture_thread {
                Some(handle) if !handle.is_finished() => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                _ => break,
            }
        }
        if let Some(handle) = self.capture_thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("audio capture thread still busy at abort, detaching");
            }
        }
        self.claim = None;
        self.completion_rx = None;
    }
}
