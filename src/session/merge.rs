//! Raw stream muxing
//!
//! Combines a finished raw video file and a raw audio file into one
//! container with a single FFmpeg invocation, off the calling thread.
//! Source files are never touched on failure so they stay available for
//! retry and diagnosis.

use crate::config::TOOL_TIMEOUT;
use crate::media::{run_ffmpeg, ToolError};
use crate::session::SessionError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// The mux step as the session controller sees it
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), SessionError>;
}

/// FFmpeg-backed muxer
pub struct MergeWorker {
    timeout: Duration,
}

impl MergeWorker {
    pub fn new() -> Self {
        Self {
            timeout: TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Build the mux argument vector: copy the video stream as-is, encode
    /// the WAV track to aac, stop at the shorter stream.
    fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Run the mux to completion. Safe to call once per output; on failure
    /// the error carries FFmpeg's captured stderr and the inputs are left
    /// in place.
    pub async fn run(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), ToolError> {
        let args = Self::mux_args(video, audio, output);
        let timeout = self.timeout;
        tracing::info!("merging {:?} + {:?} -> {:?}", video, audio, output);

        let result = tokio::task::spawn_blocking(move || run_ffmpeg(&args, timeout))
            .await
            .map_err(|e| ToolError::malformed("ffmpeg", format!("mux task panicked: {e}")))?;

        match result {
            Ok(_) => {
                tracing::info!("merge finished -> {:?}", output);
                Ok(())
            }
            Err(e) => {
                tracing::error!("merge failed: {e}");
                Err(e)
            }
        }
    }
}

impl Default for MergeWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Muxer for MergeWorker {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), SessionError> {
        self.run(video, audio, output).await.map_err(SessionError::from)
    }
}
