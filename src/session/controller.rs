//! Recording session controller
//!
//! Drives the capture workers through the session state machine:
//! `Idle -> Recording -> Stopping -> Merging -> Done`, with `Aborted` as
//! the failure terminal. The merge step only runs once every required
//! stream has finalized its raw file; a failed worker can never leave a
//! half-written deliverable behind.

use crate::capture::{AudioCaptureWorker, CaptureWorker, DeviceRegistry, VideoCaptureWorker};
use crate::config::{CaptureConfig, WORKER_STOP_TIMEOUT};
use crate::session::merge::{MergeWorker, Muxer};
use crate::session::{RecordingKind, SessionError, SessionState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a session runs
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started,
    /// Workers toggled off, waiting for raw files
    Stopping,
    /// All raw files finalized, mux in flight
    Merging,
    /// Deliverable persisted
    Done(PathBuf),
    Aborted(String),
}

/// One recording session from device open to persisted deliverable
pub struct RecordingSessionController {
    id: Uuid,
    kind: RecordingKind,
    storage_dir: PathBuf,
    raw_dir: PathBuf,
    state: Arc<RwLock<SessionState>>,
    video: Option<Box<dyn CaptureWorker>>,
    audio: Box<dyn CaptureWorker>,
    muxer: Box<dyn Muxer>,
    stop_timeout: Duration,
    event_tx: broadcast::Sender<SessionEvent>,
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
    /// Per-stream finalized raw files; merge requires all of them
    video_raw: Option<PathBuf>,
    audio_raw: Option<PathBuf>,
    merged_output: Option<PathBuf>,
}

impl RecordingSessionController {
    /// Create a session over the real capture devices
    pub fn new(
        kind: RecordingKind,
        storage_dir: PathBuf,
        config: &CaptureConfig,
        registry: DeviceRegistry,
    ) -> Self {
        let raw_dir = storage_dir.join("raw");
        let video: Option<Box<dyn CaptureWorker>> = if kind.captures_video() {
            Some(Box::new(VideoCaptureWorker::new(
                None,
                raw_dir.join("record_video.mp4"),
                config.video_fps,
                registry.clone(),
            )))
        } else {
            None
        };
        let audio: Box<dyn CaptureWorker> = Box::new(AudioCaptureWorker::new(
            raw_dir.join("record_audio.wav"),
            config.audio_sample_rate,
            config.audio_channels,
            registry,
        ));
        Self::with_parts(kind, storage_dir, video, audio, Box::new(MergeWorker::new()))
    }

    /// Create a session from explicit parts (used by tests to substitute
    /// workers and the muxer)
    pub fn with_parts(
        kind: RecordingKind,
        storage_dir: PathBuf,
        video: Option<Box<dyn CaptureWorker>>,
        audio: Box<dyn CaptureWorker>,
        muxer: Box<dyn Muxer>,
    ) -> Self {
        let raw_dir = storage_dir.join("raw");
        let (event_tx, _) = broadcast::channel(16);
        Self {
            id: Uuid::new_v4(),
            kind,
            storage_dir,
            raw_dir,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            video,
            audio,
            muxer,
            stop_timeout: WORKER_STOP_TIMEOUT,
            event_tx,
            started_at: None,
            started_wall: None,
            elapsed: None,
            video_raw: None,
            audio_raw: None,
            merged_output: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn kind(&self) -> RecordingKind {
        self.kind
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// When the session started, in wall-clock terms
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_wall
    }

    /// Recorded wall time so far (live while recording, fixed afterwards)
    pub fn duration_secs(&self) -> f64 {
        match (self.elapsed, self.started_at) {
            (Some(elapsed), _) => elapsed.as_secs_f64(),
            (None, Some(started)) => started.elapsed().as_secs_f64(),
            (None, None) => 0.0,
        }
    }

    /// The persisted deliverable, once the session is `Done`
    pub fn merged_output(&self) -> Option<&Path> {
        self.merged_output.as_deref()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn require_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        let actual = *self.state.read();
        if actual != expected {
            return Err(SessionError::InvalidState { operation, actual });
        }
        Ok(())
    }

    /// Start the capture workers and begin recording.
    ///
    /// Device availability failures are reported here, synchronously, and
    /// leave the session in `Idle` with nothing running.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.require_state(SessionState::Idle, "start")?;
        std::fs::create_dir_all(&self.raw_dir)?;

        if let Some(video) = self.video.as_mut() {
            video.start().await?;
        }
        if let Err(e) = self.audio.start().await {
            // The audio timing track is mandatory; release the camera
            if let Some(video) = self.video.as_mut() {
                video.abort();
            }
            return Err(e.into());
        }

        if let Some(video) = self.video.as_mut() {
            video.toggle_record()?;
        }
        self.audio.toggle_record()?;

        self.started_at = Some(Instant::now());
        self.started_wall = Some(Utc::now());
        self.elapsed = None;
        *self.state.write() = SessionState::Recording;
        self.emit(SessionEvent::Started);
        tracing::info!("recording session {} started ({:?})", self.id, self.kind);
        Ok(())
    }

    /// Stop recording, wait for every required stream, then merge and
    /// persist the deliverable.
    pub async fn stop(&mut self) -> Result<PathBuf, SessionError> {
        self.require_state(SessionState::Recording, "stop")?;
        *self.state.write() = SessionState::Stopping;
        self.emit(SessionEvent::Stopping);
        self.elapsed = self.started_at.map(|s| s.elapsed());

        // Stop order is video first, then audio, then wait for both
        if let Some(video) = self.video.as_mut() {
            if let Err(e) = video.toggle_record() {
                return Err(self.fail(format!("video stop failed: {e}")));
            }
        }
        if let Err(e) = self.audio.toggle_record() {
            return Err(self.fail(format!("audio stop failed: {e}")));
        }

        let mut video_raw: Option<PathBuf> = None;
        if let Some(video) = self.video.as_mut() {
            match video.wait_finished(self.stop_timeout).await {
                Ok(path) => video_raw = Some(path),
                Err(e) => return Err(self.fail(format!("video capture failed: {e}"))),
            }
        }
        let audio_raw = match self.audio.wait_finished(self.stop_timeout).await {
            Ok(path) => path,
            Err(e) => return Err(self.fail(format!("audio capture failed: {e}"))),
        };
        self.video_raw = video_raw.clone();
        self.audio_raw = Some(audio_raw.clone());

        if !self.kind.needs_merge() {
            // The WAV itself is the deliverable
            let output = self.next_output_path("wav")?;
            persist(&audio_raw, &output)?;
            self.merged_output = Some(output.clone());
            *self.state.write() = SessionState::Done;
            self.emit(SessionEvent::Done(output.clone()));
            tracing::info!("session done -> {:?}", output);
            return Ok(output);
        }

        // Both raw files exist and are closed; safe to merge
        let Some(video_raw) = video_raw else {
            return Err(self.fail("video stream never finished".to_string()));
        };
        *self.state.write() = SessionState::Merging;
        self.emit(SessionEvent::Merging);

        let merge_target = self.raw_dir.join("record.mp4");
        if let Err(e) = self
            .muxer
            .mux(&video_raw, &audio_raw, &merge_target)
            .await
        {
            // Raw inputs stay in place for retry/diagnosis
            return Err(self.fail(format!("merge failed: {e}")));
        }

        let output = self.next_output_path("mp4")?;
        persist(&merge_target, &output)?;
        self.merged_output = Some(output.clone());
        *self.state.write() = SessionState::Done;
        self.emit(SessionEvent::Done(output.clone()));
        tracing::info!("session done -> {:?}", output);
        Ok(output)
    }

    /// Tear the session down from any live state
    pub fn abort(&mut self, reason: &str) {
        let state = *self.state.read();
        if matches!(state, SessionState::Done | SessionState::Aborted) {
            return;
        }
        let _ = self.fail(reason.to_string());
    }

    fn fail(&mut self, reason: String) -> SessionError {
        tracing::error!("session aborted: {reason}");
        if let Some(video) = self.video.as_mut() {
            video.abort();
        }
        self.audio.abort();
        *self.state.write() = SessionState::Aborted;
        self.emit(SessionEvent::Aborted(reason.clone()));
        SessionError::Aborted(reason)
    }

    /// Next free `recording_<n>` path in the storage dir; `n` increases
    /// monotonically across all recordings regardless of extension.
    fn next_output_path(&self, ext: &str) -> Result<PathBuf, SessionError> {
        std::fs::create_dir_all(&self.storage_dir)?;
        let index = next_recording_index(&self.storage_dir)?;
        Ok(self.storage_dir.join(format!("recording_{index}.{ext}")))
    }
}

/// Scan a storage dir for `recording_<n>.*` files and return max(n) + 1
fn next_recording_index(dir: &Path) -> std::io::Result<u64> {
    let mut next = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(rest) = name.strip_prefix("recording_") else {
            continue;
        };
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse::<u64>() {
            next = next.max(n + 1);
        }
    }
    Ok(next)
}

/// Move a finished file into stable storage, falling back to copy when the
/// rename crosses filesystems.
fn persist(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, StreamKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockWorker {
        kind: StreamKind,
        path: PathBuf,
        fail_start: bool,
        fail_completion: bool,
        toggles: Arc<AtomicUsize>,
        started: bool,
    }

    impl MockWorker {
        fn new(kind: StreamKind, path: PathBuf) -> Self {
            Self {
                kind,
                path,
                fail_start: false,
                fail_completion: false,
                toggles: Arc::new(AtomicUsize::new(0)),
                started: false,
            }
        }
    }

    #[async_trait]
    impl CaptureWorker for MockWorker {
        fn kind(&self) -> StreamKind {
            self.kind
        }

        fn output_path(&self) -> &Path {
            &self.path
        }

        async fn start(&mut self) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::DeviceUnavailable("mock device".to_string()));
            }
            self.started = true;
            Ok(())
        }

        fn toggle_record(&mut self) -> Result<(), CaptureError> {
            if !self.started {
                return Err(CaptureError::NotRunning);
            }
            self.toggles.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_finished(&mut self, _timeout: Duration) -> Result<PathBuf, CaptureError> {
            if self.fail_completion {
                return Err(CaptureError::DeviceIo("mock device died".to_string()));
            }
            std::fs::create_dir_all(self.path.parent().unwrap()).unwrap();
            std::fs::write(&self.path, b"raw").unwrap();
            Ok(self.path.clone())
        }

        fn abort(&mut self) {
            self.started = false;
        }
    }

    struct MockMuxer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Muxer for MockMuxer {
        async fn mux(
            &self,
            _video: &Path,
            _audio: &Path,
            output: &Path,
        ) -> Result<(), SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SessionError::Aborted("mock mux failure".to_string()));
            }
            std::fs::write(output, b"merged").unwrap();
            Ok(())
        }
    }

    fn controller(
        kind: RecordingKind,
        storage: PathBuf,
        fail_video_completion: bool,
        fail_mux: bool,
    ) -> (
        RecordingSessionController,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let raw = storage.join("raw");
        let mux_calls = Arc::new(AtomicUsize::new(0));

        let mut video_worker =
            MockWorker::new(StreamKind::Video, raw.join("record_video.mp4"));
        video_worker.fail_completion = fail_video_completion;
        let video_toggles = video_worker.toggles.clone();

        let audio_worker = MockWorker::new(StreamKind::Audio, raw.join("record_audio.wav"));
        let audio_toggles = audio_worker.toggles.clone();

        let video: Option<Box<dyn CaptureWorker>> = if kind.captures_video() {
            Some(Box::new(video_worker))
        } else {
            None
        };
        let muxer = MockMuxer {
            calls: mux_calls.clone(),
            fail: fail_mux,
        };
        let controller = RecordingSessionController::with_parts(
            kind,
            storage,
            video,
            Box::new(audio_worker),
            Box::new(muxer),
        );
        (controller, mux_calls, video_toggles, audio_toggles)
    }

    #[tokio::test]
    async fn test_start_stop_audio_video_ends_done_with_one_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mux_calls, video_toggles, audio_toggles) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            false,
            false,
        );

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        let output = session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(mux_calls.load(Ordering::SeqCst), 1);
        assert!(output.ends_with("recording_0.mp4"));
        assert!(output.exists());

        // Each worker toggled on and off exactly once
        assert_eq!(video_toggles.load(Ordering::SeqCst), 2);
        assert_eq!(audio_toggles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duration_tracks_wall_time() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _, _, _) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            false,
            false,
        );

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await.unwrap();

        let duration = session.duration_secs();
        assert!(duration >= 0.05, "recorded duration {duration} too short");
        assert!(duration < 5.0, "recorded duration {duration} implausible");
        // Fixed after stop
        assert_eq!(session.duration_secs(), duration);
    }

    #[tokio::test]
    async fn test_device_failure_aborts_without_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mux_calls, _, _) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            true,
            false,
        );

        session.start().await.unwrap();
        let err = session.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::Aborted(_)));
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(mux_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_merge_failure_preserves_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mux_calls, _, _) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            false,
            true,
        );

        session.start().await.unwrap();
        session.stop().await.unwrap_err();
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(mux_calls.load(Ordering::SeqCst), 1);
        // Raw inputs stay for retry/diagnosis
        assert!(dir.path().join("raw/record_video.mp4").exists());
        assert!(dir.path().join("raw/record_audio.wav").exists());
        // Nothing persisted to stable storage
        assert!(!dir.path().join("recording_0.mp4").exists());
    }

    #[tokio::test]
    async fn test_audio_only_skips_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mux_calls, _, audio_toggles) = controller(
            RecordingKind::AudioOnly,
            dir.path().to_path_buf(),
            false,
            false,
        );

        session.start().await.unwrap();
        let output = session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(mux_calls.load(Ordering::SeqCst), 0);
        assert!(output.ends_with("recording_0.wav"));
        assert_eq!(audio_toggles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_requires_recording_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _, _, _) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            false,
            false,
        );
        let err = session.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _, _, _) = controller(
            RecordingKind::AudioVideo,
            dir.path().to_path_buf(),
            false,
            false,
        );
        session.start().await.unwrap();
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[test]
    fn test_next_recording_index_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_recording_index(dir.path()).unwrap(), 0);
        std::fs::write(dir.path().join("recording_0.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("recording_3.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        assert_eq!(next_recording_index(dir.path()).unwrap(), 4);
    }
}
