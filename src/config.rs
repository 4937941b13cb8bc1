//! Pipeline configuration
//!
//! Immutable tunables for segmentation, conversion, noise injection and
//! capture. Engines take these by reference; nothing here is mutated after
//! construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Silence-aware segmentation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationConfig {
    /// Target upper bound for a chunk's content duration, in seconds
    pub min_split_secs: f64,

    /// Minimum length of a quiet run to count as silence, in milliseconds
    pub min_silence_ms: u64,

    /// Silence threshold in dB relative to the file's own dBFS (negative)
    pub silence_threshold_db: f64,

    /// Quiet margin kept on each side of a silence run, in milliseconds
    pub silence_buffer_ms: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_split_secs: 6.0,
            min_silence_ms: 1000,
            silence_threshold_db: -30.0,
            silence_buffer_ms: 250,
        }
    }
}

impl SegmentationConfig {
    /// Silence buffer converted to seconds
    pub fn silence_buffer_secs(&self) -> f64 {
        self.silence_buffer_ms as f64 / 1000.0
    }
}

/// Output normalization tunables for the conversion adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    /// Output video width in pixels
    pub video_width: u32,

    /// Output video height in pixels
    pub video_height: u32,

    /// Output frame rate (rounded up from source)
    pub video_fps: u32,

    /// H.264 constant rate factor
    pub crf: u8,

    /// H.264 encoder preset
    pub preset: String,

    /// Output audio channel count
    pub audio_channels: u16,

    /// Output audio sample rate in Hz
    pub audio_sample_rate: u32,

    /// Output audio codec
    pub audio_codec: String,

    /// Container format / file extension
    pub container: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            video_width: 160,
            video_height: 160,
            video_fps: 25,
            crf: 20,
            preset: "slower".to_string(),
            audio_channels: 1,
            audio_sample_rate: 16_000,
            audio_codec: "aac".to_string(),
            container: "mp4".to_string(),
        }
    }
}

/// Capture device tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Requested camera frame rate
    pub video_fps: u32,

    /// Microphone sample rate in Hz
    pub audio_sample_rate: u32,

    /// Microphone channel count
    pub audio_channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_fps: 30,
            audio_sample_rate: 16_000,
            audio_channels: 1,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub segmentation: SegmentationConfig,
    pub conversion: ConversionConfig,
    pub capture: CaptureConfig,

    /// Video noise SNR in [0, 100]; 100 (the default) means no degradation
    pub video_snr: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            conversion: ConversionConfig::default(),
            capture: CaptureConfig::default(),
            video_snr: 100,
        }
    }
}

/// Default wall-clock budget for a single external tool invocation
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounded wait for a capture worker to finish after recording is toggled off
pub const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuning() {
        let seg = SegmentationConfig::default();
        assert_eq!(seg.min_split_secs, 6.0);
        assert_eq!(seg.min_silence_ms, 1000);
        assert_eq!(seg.silence_threshold_db, -30.0);
        assert!((seg.silence_buffer_secs() - 0.25).abs() < f64::EPSILON);

        let conv = ConversionConfig::default();
        assert_eq!((conv.video_width, conv.video_height), (160, 160));
        assert_eq!(conv.video_fps, 25);
        assert_eq!(conv.audio_sample_rate, 16_000);
        assert_eq!(conv.audio_channels, 1);
    }

    #[test]
    fn test_config_round_trips_json() {
        let config = PipelineConfig {
            video_snr: 60,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video_snr, 60);
        assert_eq!(back.conversion.preset, "slower");
    }
}
