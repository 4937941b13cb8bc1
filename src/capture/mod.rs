//! Live device capture
//!
//! One worker per hardware device, each owning a dedicated OS thread from
//! device open to device release. Workers are independently startable and
//! stoppable; the session controller composes them.

pub mod audio;
pub mod pacer;
pub mod video;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use audio::AudioCaptureWorker;
pub use pacer::{FramePacer, PacerClosed, VideoFrame};
pub use video::VideoCaptureWorker;

/// Which elementary stream a worker produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Capture failures
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Device absent or cannot be opened; reported before any thread starts
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device already claimed by another session
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// Mid-capture device failure; aborts the session
    #[error("device I/O error: {0}")]
    DeviceIo(String),

    /// Raw sink (encoder or file writer) failure
    #[error("capture sink error: {0}")]
    Sink(String),

    #[error("capture already running")]
    AlreadyRunning,

    #[error("capture not running")]
    NotRunning,

    /// Worker failed to finish within the bounded stop window
    #[error("capture worker did not finish within {0:?}")]
    StopTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A capture worker as seen by the session controller.
///
/// `start` performs the synchronous device-availability check and spawns
/// the capture thread. `toggle_record` flips the recording state: the first
/// toggle opens the output sink, the second closes it and arms the
/// completion event, which fires exactly once per recording instance and is
/// observed through `wait_finished`.
#[async_trait]
pub trait CaptureWorker: Send {
    fn kind(&self) -> StreamKind;

    /// Path the finished raw file will be written to
    fn output_path(&self) -> &std::path::Path;

    /// Check the device and spawn the capture loop
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Flip the recording flag
    fn toggle_record(&mut self) -> Result<(), CaptureError>;

    /// Await the completion event, bounded. On timeout the worker is torn
    /// down and `StopTimeout` is returned.
    async fn wait_finished(&mut self, timeout: Duration) -> Result<PathBuf, CaptureError>;

    /// Force teardown: release the device and join the thread. Safe to call
    /// more than once.
    fn abort(&mut self);
}

/// Tracks which hardware devices are currently open.
///
/// A device may be claimed by exactly one worker at a time; a second claim
/// fails instead of risking interleaved writes.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a device, failing if it is already held
    pub fn claim(&self, device: &str) -> Result<DeviceClaim, CaptureError> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(device.to_string()) {
            return Err(CaptureError::DeviceBusy(device.to_string()));
        }
        Ok(DeviceClaim {
            registry: self.clone(),
            device: device.to_string(),
        })
    }

    fn release(&self, device: &str) {
        self.claimed.lock().remove(device);
    }
}

/// RAII guard for a claimed device
pub struct DeviceClaim {
    registry: DeviceRegistry,
    device: String,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.registry.release(&self.device);
    }
}
