//! Camera capture worker
//!
//! Runs a nokhwa camera on a dedicated thread from device open to device
//! release. Every frame is offered to the preview pacer; while recording is
//! toggled on, frames are also piped to an FFmpeg rawvideo encoder writing
//! the raw intermediate file. The second toggle finishes the encoder, fires
//! the completion event and ends the capture loop.

use crate::capture::pacer::{FramePacer, VideoFrame};
use crate::capture::{CaptureError, CaptureWorker, DeviceClaim, DeviceRegistry, StreamKind};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// FFmpeg encoder for the raw capture sink
///
/// Raw camera frames go straight to FFmpeg's stdin in the camera's native
/// pixel format; FFmpeg handles conversion and writes an H.264 intermediate
/// at near-lossless quality.
struct RawVideoEncoder {
    process: Option<Child>,
    output: PathBuf,
    frames_written: u64,
}

impl RawVideoEncoder {
    fn open(
        width: u32,
        height: u32,
        fps: u32,
        pixel_format: &str,
        output: &Path,
    ) -> Result<Self, CaptureError> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pixel_format",
                pixel_format,
                "-video_size",
                &format!("{width}x{height}"),
                "-framerate",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                "18",
                "-movflags",
                "+faststart",
                &output.to_string_lossy(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::Sink(format!("failed to start video encoder: {e}")))?;

        tracing::info!(
            "raw video sink opened: {}x{} @ {}fps ({}) -> {:?}",
            width,
            height,
            fps,
            pixel_format,
            output
        );

        Ok(Self {
            process: Some(process),
            output: output.to_path_buf(),
            frames_written: 0,
        })
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| CaptureError::Sink("video encoder stdin closed".to_string()))?;
        stdin
            .write_all(data)
            .map_err(|e| CaptureError::Sink(format!("failed to write frame: {e}")))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Close stdin and wait for FFmpeg to finalize the container
    fn finish(mut self) -> Result<PathBuf, CaptureError> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| CaptureError::Sink("video encoder already finished".to_string()))?;
        drop(process.stdin.take());
        let output = process
            .wait_with_output()
            .map_err(|e| CaptureError::Sink(format!("failed to wait for video encoder: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Sink(format!(
                "video encoder exited with {}: {}",
                output.status, stderr
            )));
        }
        tracing::info!(
            "raw video sink finished: {} frames -> {:?}",
            self.frames_written,
            self.output
        );
        Ok(self.output.clone())
    }
}

impl Drop for RawVideoEncoder {
    fn drop(&mut self) {
        // Abandoned sink: kill and reap so a partial file is never promoted
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Map a nokhwa frame format onto the FFmpeg rawvideo pixel format name
fn ffmpeg_pixel_format(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::YUYV => "yuyv422",
        FrameFormat::NV12 => "nv12",
        FrameFormat::RAWRGB => "rgb24",
        FrameFormat::MJPEG => "mjpeg",
        _ => {
            tracing::warn!("unknown camera format {:?}, assuming yuyv422", format);
            "yuyv422"
        }
    }
}

/// Camera capture worker
pub struct VideoCaptureWorker {
    device_id: Option<String>,
    output_path: PathBuf,
    fps: u32,
    registry: DeviceRegistry,
    pacer: Arc<FramePacer>,
    running: Arc<AtomicBool>,
    record_requested: Arc<AtomicBool>,
    toggles: u32,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    completion_rx: Option<oneshot::Receiver<Result<PathBuf, CaptureError>>>,
    claim: Option<DeviceClaim>,
}

impl VideoCaptureWorker {
    /// Create a worker for the given camera (None = default camera)
    pub fn new(
        device_id: Option<String>,
        output_path: PathBuf,
        fps: u32,
        registry: DeviceRegistry,
    ) -> Self {
        Self {
            device_id,
            output_path,
            fps,
            registry,
            pacer: FramePacer::new(),
            running: Arc::new(AtomicBool::new(false)),
            record_requested: Arc::new(AtomicBool::new(false)),
            toggles: 0,
            capture_thread: None,
            completion_rx: None,
            claim: None,
        }
    }

    /// The pacer a preview consumer can attach to
    pub fn pacer(&self) -> Arc<FramePacer> {
        self.pacer.clone()
    }

    fn camera_index(&self) -> CameraIndex {
        match &self.device_id {
            Some(id) => match id.parse::<u32>() {
                Ok(idx) => CameraIndex::Index(idx),
                Err(_) => CameraIndex::String(id.clone()),
            },
            None => CameraIndex::Index(0),
        }
    }

    fn registry_key(&self) -> String {
        format!("camera:{:?}", self.camera_index())
    }

    /// Synchronous availability check: open and immediately release the
    /// device, exactly like the preflight the capture thread will repeat.
    fn check_device(&self) -> Result<(), CaptureError> {
        let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
        match Camera::new(self.camera_index(), format) {
            Ok(_probe) => Ok(()),
            Err(e) => Err(CaptureError::DeviceUnavailable(format!(
                "camera {:?}: {e}",
                self.camera_index()
            ))),
        }
    }

    fn start_sync(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }
        let claim = self.registry.claim(&self.registry_key())?;
        self.check_device()?;
        self.claim = Some(claim);

        self.running.store(true, Ordering::SeqCst);
        self.toggles = 0;

        let (completion_tx, completion_rx) = oneshot::channel();
        self.completion_rx = Some(completion_rx);

        let camera_index = self.camera_index();
        let output_path = self.output_path.clone();
        let fps = self.fps;
        let pacer = self.pacer.clone();
        let running = self.running.clone();
        let record_requested = self.record_requested.clone();

        let handle = std::thread::spawn(move || {
            capture_loop(
                camera_index,
                output_path,
                fps,
                pacer,
                running,
                record_requested,
                completion_tx,
            );
        });
        self.capture_thread = Some(handle);

        tracing::info!("video capture started (camera {:?})", self.camera_index());
        Ok(())
    }
}

/// The camera thread body: open the device, pump frames into the pacer, and
/// drive the raw sink from the recording flag. The completion event fires
/// exactly once, on sink close or on device failure.
fn capture_loop(
    camera_index: CameraIndex,
    output_path: PathBuf,
    fps: u32,
    pacer: Arc<FramePacer>,
    running: Arc<AtomicBool>,
    record_requested: Arc<AtomicBool>,
    completion_tx: oneshot::Sender<Result<PathBuf, CaptureError>>,
) {
    let mut completion = Some(completion_tx);
    let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = match Camera::new(camera_index.clone(), format) {
        Ok(c) => c,
        Err(e) => {
            if let Some(tx) = completion.take() {
                let _ = tx.send(Err(CaptureError::DeviceIo(format!(
                    "failed to reopen camera {camera_index:?}: {e}"
                ))));
            }
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        if let Some(tx) = completion.take() {
            let _ = tx.send(Err(CaptureError::DeviceIo(format!(
                "failed to open camera stream: {e}"
            ))));
        }
        return;
    }

    let camera_format = camera.camera_format();
    let width = camera_format.resolution().width();
    let height = camera_format.resolution().height();
    let pixel_format = ffmpeg_pixel_format(camera_format.format());
    tracing::info!(
        "camera opened: {}x{} @ {}fps, format {:?}",
        width,
        height,
        camera_format.frame_rate(),
        camera_format.format()
    );

    let mut encoder: Option<RawVideoEncoder> = None;

    while running.load(Ordering::SeqCst) {
        // Recording flag transitions are observed here so the sink lives
        // entirely on the capture thread.
        let recording = record_requested.load(Ordering::SeqCst);
        if recording && encoder.is_none() {
            match RawVideoEncoder::open(width, height, fps, pixel_format, &output_path) {
                Ok(enc) => encoder = Some(enc),
                Err(e) => {
                    if let Some(tx) = completion.take() {
                        let _ = tx.send(Err(e));
                    }
                    break;
                }
            }
        }
        if !recording {
            if let Some(enc) = encoder.take() {
                // Second toggle: finalize the sink, report completion, and
                // end the loop so the device is released.
                if let Some(tx) = completion.take() {
                    let _ = tx.send(enc.finish());
                }
                break;
            }
        }

        // Blocks until the camera delivers the next frame
        match camera.frame() {
            Ok(frame) => {
                let data = frame.buffer().to_vec();
                if let Some(enc) = encoder.as_mut() {
                    if let Err(e) = enc.write_frame(&data) {
                        if let Some(tx) = completion.take() {
                            let _ = tx.send(Err(e));
                        }
                        break;
                    }
                }
                let paced = pacer.produce(VideoFrame {
                    data,
                    width,
                    height,
                });
                if paced.is_err() {
                    // Pacer closed: session teardown in progress
                    break;
                }
            }
            Err(e) => {
                if let Some(tx) = completion.take() {
                    let _ = tx.send(Err(CaptureError::DeviceIo(format!(
                        "camera read failed: {e}"
                    ))));
                }
                break;
            }
        }
    }

    // Unfinished sink here means teardown or failure; drop kills the
    // encoder process without promoting a partial file.
    drop(encoder);

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("error stopping camera stream: {e}");
    }
    running.store(false, Ordering::SeqCst);
    tracing::info!("video capture thread exited");
}

#[async_trait]
impl CaptureWorker for VideoCaptureWorker {
    fn kind(&self) -> StreamKind {
        StreamKind::Video
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
        tracing::debug!("video record toggled -> {}", now_recording);
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
                    "video capture thread exited without reporting".to_string(),
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
        self.pacer.close();
        // Bounded teardown: give the loop a moment to notice the flags,
        // then detach rather than risk blocking on a wedged device read.
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
                tracing::warn!("video capture thread still busy at abort, detaching");
            }
        }
        self.claim = None;
        self.completion_rx = None;
    }
}

impl VideoCaptureWorker {
    fn join_thread(&mut self) {
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }
}
