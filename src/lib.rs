//! avprep - synchronized capture and preparation pipeline
//!
//! Records time-aligned audio/video from live devices, merges the raw
//! streams, optionally injects SNR-controlled pixel noise, splits media
//! into bounded-duration chunks along silence boundaries, and normalizes
//! chunks for an external speech-recognition predictor.

pub mod capture;
pub mod config;
pub mod convert;
pub mod media;
pub mod noise;
pub mod pipeline;
pub mod segment;
pub mod session;

pub use config::PipelineConfig;
pub use convert::ProcessingMode;
pub use media::MediaAsset;
pub use pipeline::{ModeSelection, PipelineDriver, PreparedBatch};
pub use session::{RecordingKind, RecordingSessionController, SessionState};
