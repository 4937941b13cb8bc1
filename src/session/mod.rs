//! Recording sessions
//!
//! A session owns one capture worker per required stream, drives them
//! through a start/stop lifecycle, and merges the finished raw files into
//! the deliverable container.

pub mod controller;
pub mod merge;

use crate::capture::CaptureError;
use crate::media::ToolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use controller::{RecordingSessionController, SessionEvent};
pub use merge::{MergeWorker, Muxer};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    Idle,
    /// Capture workers running and recording
    Recording,
    /// Recording toggled off, waiting for workers to finish their files
    Stopping,
    /// Raw files finalized, mux in flight
    Merging,
    /// Terminal: deliverable persisted
    Done,
    /// Terminal: device failure or teardown; no merge was attempted
    Aborted,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// What a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingKind {
    AudioOnly,
    VideoOnly,
    AudioVideo,
}

impl RecordingKind {
    /// Video recordings always capture audio alongside: the audio track is
    /// the timing reference the mux step aligns against.
    pub fn captures_video(&self) -> bool {
        !matches!(self, RecordingKind::AudioOnly)
    }

    /// Whether the finished session needs a mux step at all
    pub fn needs_merge(&self) -> bool {
        self.captures_video()
    }
}

/// Session failures
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session state {actual:?} for {operation}")]
    InvalidState {
        operation: &'static str,
        actual: SessionState,
    },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("merge failed: {0}")]
    Merge(#[from] ToolError),

    #[error("session aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
