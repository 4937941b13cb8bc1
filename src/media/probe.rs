//! Stream probing
//!
//! Inspects a media file with ffprobe and reports which channels are
//! present plus the container duration. Probing is cheap and files may be
//! rewritten between pipeline stages, so results are never cached.

use crate::media::command::{run_tool, ToolError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A probed media file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub has_audio: bool,
    pub has_video: bool,
    pub duration_secs: f64,
}

impl MediaAsset {
    /// Whether the file carries any usable stream at all
    pub fn has_any_stream(&self) -> bool {
        self.has_audio || self.has_video
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe a file for stream layout and duration
pub fn probe(path: &Path, timeout: Duration) -> Result<MediaAsset, ToolError> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "stream=codec_type:format=duration".to_string(),
        "-of".to_string(),
        "json".to_string(),
        path.to_string_lossy().into_owned(),
    ];
    let output = run_tool("ffprobe", &args, timeout)?;
    let asset = parse_probe_output(path, &output.stdout_text())?;

    tracing::debug!(
        "probed {:?}: audio={} video={} duration={:.2}s",
        path,
        asset.has_audio,
        asset.has_video,
        asset.duration_secs
    );
    Ok(asset)
}

/// Geometry and timing of a file's first video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Probe the first video stream's resolution and frame rate
pub fn probe_video_params(path: &Path, timeout: Duration) -> Result<VideoParams, ToolError> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height,r_frame_rate".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        path.to_string_lossy().into_owned(),
    ];
    let output = run_tool("ffprobe", &args, timeout)?;
    parse_video_params(&output.stdout_text())
}

fn parse_video_params(text: &str) -> Result<VideoParams, ToolError> {
    let line = text.trim();
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        return Err(ToolError::malformed(
            "ffprobe",
            format!("expected width,height,r_frame_rate, got {line:?}"),
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| ToolError::malformed("ffprobe", format!("bad width {:?}", parts[0])))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| ToolError::malformed("ffprobe", format!("bad height {:?}", parts[1])))?;

    // Frame rate arrives as a rational, e.g. "30/1" or "30000/1001"
    let fps = match parts[2].split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().map_err(|_| {
                ToolError::malformed("ffprobe", format!("bad frame rate {:?}", parts[2]))
            })?;
            let den: f64 = den.parse().map_err(|_| {
                ToolError::malformed("ffprobe", format!("bad frame rate {:?}", parts[2]))
            })?;
            if den == 0.0 {
                return Err(ToolError::malformed(
                    "ffprobe",
                    format!("zero denominator in {:?}", parts[2]),
                ));
            }
            num / den
        }
        None => parts[2].parse().map_err(|_| {
            ToolError::malformed("ffprobe", format!("bad frame rate {:?}", parts[2]))
        })?,
    };

    Ok(VideoParams { width, height, fps })
}

fn parse_probe_output(path: &Path, json: &str) -> Result<MediaAsset, ToolError> {
    let report: ProbeReport = serde_json::from_str(json)
        .map_err(|e| ToolError::malformed("ffprobe", format!("invalid JSON: {e}")))?;

    let mut has_audio = false;
    let mut has_video = false;
    for stream in &report.streams {
        match stream.codec_type.as_deref() {
            Some("audio") => has_audio = true,
            Some("video") => has_video = true,
            _ => {}
        }
    }

    let duration_secs = report
        .format
        .and_then(|f| f.duration)
        .as_deref()
        .map(str::trim)
        .map(|d| {
            d.parse::<f64>()
                .map_err(|_| ToolError::malformed("ffprobe", format!("bad duration {d:?}")))
        })
        .transpose()?
        .unwrap_or(0.0);

    Ok(MediaAsset {
        path: path.to_path_buf(),
        has_audio,
        has_video,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_streams() {
        let json = r#"{
            "streams": [{"codec_type": "video"}, {"codec_type": "audio"}],
            "format": {"duration": "12.480000"}
        }"#;
        let asset = parse_probe_output(Path::new("clip.mp4"), json).unwrap();
        assert!(asset.has_audio);
        assert!(asset.has_video);
        assert!((asset.duration_secs - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_video_only() {
        let json = r#"{
            "streams": [{"codec_type": "video"}],
            "format": {"duration": "3.0"}
        }"#;
        let asset = parse_probe_output(Path::new("silent.mp4"), json).unwrap();
        assert!(asset.has_video);
        assert!(!asset.has_audio);
    }

    #[test]
    fn test_parse_no_streams() {
        let asset =
            parse_probe_output(Path::new("empty.bin"), r#"{"streams": [], "format": {}}"#).unwrap();
        assert!(!asset.has_any_stream());
        assert_eq!(asset.duration_secs, 0.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_probe_output(Path::new("x"), "not json").unwrap_err();
        assert!(matches!(err, ToolError::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_duration() {
        let json = r#"{"streams": [], "format": {"duration": "N/A"}}"#;
        let err = parse_probe_output(Path::new("x"), json).unwrap_err();
        assert!(matches!(err, ToolError::Malformed { .. }));
    }

    #[test]
    fn test_parse_video_params_integer_rate() {
        let params = parse_video_params("640,480,30/1\n").unwrap();
        assert_eq!(params.width, 640);
        assert_eq!(params.height, 480);
        assert!((params.fps - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_video_params_ntsc_rate() {
        let params = parse_video_params("1920,1080,30000/1001").unwrap();
        assert!((params.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_video_params_rejects_short_line() {
        let err = parse_video_params("640,480").unwrap_err();
        assert!(matches!(err, ToolError::Malformed { .. }));
    }
}
