//! Format normalization
//!
//! Normalizes a chunk file to the geometry and audio layout the predictor
//! expects, keeping only the streams the processing mode asks for. The
//! transform is stateless: the same input and mode always produce the same
//! stream layout.

use crate::config::{ConversionConfig, TOOL_TIMEOUT};
use crate::media::command::{run_ffmpeg, ToolError};
use crate::media::MediaAsset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which channels survive conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    AudioOnly,
    VideoOnly,
    AudioVideo,
}

impl ProcessingMode {
    pub fn wants_video(&self) -> bool {
        !matches!(self, ProcessingMode::AudioOnly)
    }

    pub fn wants_audio(&self) -> bool {
        !matches!(self, ProcessingMode::VideoOnly)
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::AudioOnly => write!(f, "audio-only"),
            ProcessingMode::VideoOnly => write!(f, "video-only"),
            ProcessingMode::AudioVideo => write!(f, "audio-video"),
        }
    }
}

/// Conversion failures
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{path:?} has no {missing} stream required by {mode}")]
    MissingStream {
        path: PathBuf,
        missing: &'static str,
        mode: ProcessingMode,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalizes chunk files for the predictor
pub struct FormatConversionAdapter<'a> {
    config: &'a ConversionConfig,
    timeout: Duration,
}

impl<'a> FormatConversionAdapter<'a> {
    pub fn new(config: &'a ConversionConfig) -> Self {
        Self {
            config,
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Convert one file according to `mode`, writing `<stem>_output.<ext>`
    /// next to the input and returning that path.
    pub fn convert(
        &self,
        asset: &MediaAsset,
        mode: ProcessingMode,
    ) -> Result<PathBuf, ConvertError> {
        let output = output_path(&asset.path, &self.config.container);
        let args = convert_args(asset, mode, self.config, &output)?;
        run_ffmpeg(&args, self.timeout)?;
        tracing::debug!("converted {:?} ({}) -> {:?}", asset.path, mode, output);
        Ok(output)
    }
}

/// `<stem>_output.<ext>` beside the input
fn output_path(input: &Path, container: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    input.with_file_name(format!("{stem}_output.{container}"))
}

/// Build the conversion argument vector for one mode
fn convert_args(
    asset: &MediaAsset,
    mode: ProcessingMode,
    config: &ConversionConfig,
    output: &Path,
) -> Result<Vec<String>, ConvertError> {
    if mode.wants_video() && !asset.has_video {
        return Err(ConvertError::MissingStream {
            path: asset.path.clone(),
            missing: "video",
            mode,
        });
    }
    if mode.wants_audio() && !asset.has_audio {
        return Err(ConvertError::MissingStream {
            path: asset.path.clone(),
            missing: "audio",
            mode,
        });
    }

    let mut args = vec![
        "-i".to_string(),
        asset.path.to_string_lossy().into_owned(),
    ];

    if mode.wants_video() {
        args.push("-vf".to_string());
        args.push(format!(
            "scale={}:{},fps={}:round=up",
            config.video_width, config.video_height, config.video_fps
        ));
        args.push("-crf".to_string());
        args.push(config.crf.to_string());
        args.push("-preset".to_string());
        args.push(config.preset.clone());
    } else {
        args.push("-vn".to_string());
    }

    if mode.wants_audio() {
        args.push("-ac".to_string());
        args.push(config.audio_channels.to_string());
        args.push("-ar".to_string());
        args.push(config.audio_sample_rate.to_string());
        args.push("-c:a".to_string());
        args.push(config.audio_codec.clone());
    } else {
        args.push("-an".to_string());
    }

    args.push("-f".to_string());
    args.push(config.container.clone());
    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(has_audio: bool, has_video: bool) -> MediaAsset {
        MediaAsset {
            path: PathBuf::from("work/clip_chunk_0.mp4"),
            has_audio,
            has_video,
            duration_secs: 5.0,
        }
    }

    #[test]
    fn test_output_naming() {
        assert_eq!(
            output_path(Path::new("work/clip_chunk_0.mp4"), "mp4"),
            PathBuf::from("work/clip_chunk_0_output.mp4")
        );
    }

    #[test]
    fn test_audio_video_keeps_both_streams() {
        let config = ConversionConfig::default();
        let args = convert_args(
            &asset(true, true),
            ProcessingMode::AudioVideo,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap();
        let vf_pos = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf_pos + 1], "scale=160:160,fps=25:round=up");
        assert!(args.contains(&"-ar".to_string()));
        assert!(args.contains(&"16000".to_string()));
        assert!(!args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_video_only_drops_audio() {
        let config = ConversionConfig::default();
        let args = convert_args(
            &asset(true, true),
            ProcessingMode::VideoOnly,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap();
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
        assert!(args.contains(&"-preset".to_string()));
    }

    #[test]
    fn test_audio_only_drops_video() {
        let config = ConversionConfig::default();
        let args = convert_args(
            &asset(true, true),
            ProcessingMode::AudioOnly,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap();
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
        // CRF and preset only apply to video encodes
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn test_missing_stream_rejected() {
        let config = ConversionConfig::default();
        let err = convert_args(
            &asset(true, false),
            ProcessingMode::VideoOnly,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap_err();
        assert!(matches!(err, ConvertError::MissingStream { missing: "video", .. }));
    }

    #[test]
    fn test_same_input_same_args() {
        let config = ConversionConfig::default();
        let a = convert_args(
            &asset(true, true),
            ProcessingMode::AudioVideo,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap();
        let b = convert_args(
            &asset(true, true),
            ProcessingMode::AudioVideo,
            &config,
            Path::new("out.mp4"),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
