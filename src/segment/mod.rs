//! Media segmentation
//!
//! Splits a finished media file into bounded-duration chunks ahead of
//! format conversion and prediction. Audio-led content is cut along
//! silence boundaries; video-only content falls back to fixed windows.

pub mod packer;
pub mod silence;

use crate::config::{SegmentationConfig, TOOL_TIMEOUT};
use crate::media::command::{run_ffmpeg, ToolError};
use crate::media::MediaAsset;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Half-open span of source time, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInterval {
    pub start_secs: f64,
    pub stop_secs: f64,
}

impl TimeInterval {
    pub fn new(start_secs: f64, stop_secs: f64) -> Self {
        debug_assert!(stop_secs > start_secs, "empty interval {start_secs}..{stop_secs}");
        Self {
            start_secs,
            stop_secs,
        }
    }

    pub fn duration(&self) -> f64 {
        self.stop_secs - self.start_secs
    }
}

/// One output segment: an ordered run of source intervals that the encoder
/// concatenates into a single file
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub intervals: Vec<TimeInterval>,
}

impl Chunk {
    pub fn single(start_secs: f64, stop_secs: f64) -> Self {
        Self {
            intervals: vec![TimeInterval::new(start_secs, stop_secs)],
        }
    }

    /// Total content duration across all intervals
    pub fn duration(&self) -> f64 {
        self.intervals.iter().map(TimeInterval::duration).sum()
    }
}

/// Segmentation failures
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits media files into bounded-duration chunks
pub struct SegmentationEngine<'a> {
    config: &'a SegmentationConfig,
    timeout: Duration,
}

impl<'a> SegmentationEngine<'a> {
    pub fn new(config: &'a SegmentationConfig) -> Self {
        Self {
            config,
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Compute the chunk plan for an asset without touching any files.
    ///
    /// Chunks come back in strictly increasing time order; their indices
    /// are what `split` uses to name output files.
    pub fn plan(&self, asset: &MediaAsset) -> Result<Vec<Chunk>, SegmentError> {
        if asset.duration_secs <= self.config.min_split_secs {
            if asset.duration_secs <= 0.0 {
                return Ok(Vec::new());
            }
            return Ok(vec![Chunk::single(0.0, asset.duration_secs)]);
        }

        if !asset.has_audio {
            return Ok(packer::fixed_windows(
                asset.duration_secs,
                self.config.min_split_secs,
            ));
        }

        let samples = silence::decode_pcm(&asset.path, self.timeout)?;
        let level = silence::dbfs(&samples);
        let silences = silence::detect_silence(
            &samples,
            silence::ANALYSIS_SAMPLE_RATE,
            self.config.min_silence_ms,
            level + self.config.silence_threshold_db,
        );
        tracing::debug!(
            "{:?}: level {:.1} dBFS, {} silence runs",
            asset.path,
            level,
            silences.len()
        );

        let trimmed = packer::trim_silences(&silences, self.config.silence_buffer_secs());
        let ranges = packer::content_ranges(asset.duration_secs, &trimmed);
        Ok(packer::pack_ranges(&ranges, self.config.min_split_secs))
    }

    /// Plan and extract chunk files next to each other in `out_dir`,
    /// named `<basename>_chunk_<i>`.
    pub fn split(&self, asset: &MediaAsset, out_dir: &Path) -> Result<Vec<PathBuf>, SegmentError> {
        let chunks = self.plan(asset)?;
        std::fs::create_dir_all(out_dir)?;

        let stem = asset
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let ext = asset
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());

        let mut outputs = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let output = out_dir.join(format!("{stem}_chunk_{index}.{ext}"));
            let args = extract_args(&asset.path, chunk, asset.has_video, asset.has_audio, &output);
            run_ffmpeg(&args, self.timeout)?;
            tracing::debug!(
                "chunk {} ({:.2}s) -> {:?}",
                index,
                chunk.duration(),
                output
            );
            outputs.push(output);
        }
        tracing::info!("split {:?} into {} chunks", asset.path, outputs.len());
        Ok(outputs)
    }
}

/// Build the FFmpeg argument vector that extracts one chunk: each interval
/// becomes a trimmed input, and multi-interval chunks are joined with a
/// concat filter over whichever streams the source carries.
fn extract_args(
    source: &Path,
    chunk: &Chunk,
    has_video: bool,
    has_audio: bool,
    output: &Path,
) -> Vec<String> {
    let mut args = Vec::new();
    for interval in &chunk.intervals {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", interval.start_secs));
        args.push("-to".to_string());
        args.push(format!("{:.3}", interval.stop_secs));
        args.push("-i".to_string());
        args.push(source.to_string_lossy().into_owned());
    }

    let n = chunk.intervals.len();
    if n > 1 {
        let mut filter = String::new();
        for i in 0..n {
            if has_video {
                filter.push_str(&format!("[{i}:v:0]"));
            }
            if has_audio {
                filter.push_str(&format!("[{i}:a:0]"));
            }
        }
        filter.push_str(&format!(
            "concat=n={n}:v={}:a={}",
            u8::from(has_video),
            u8::from(has_audio)
        ));
        if has_video {
            filter.push_str("[outv]");
        }
        if has_audio {
            filter.push_str("[outa]");
        }
        args.push("-filter_complex".to_string());
        args.push(filter);
        if has_video {
            args.push("-map".to_string());
            args.push("[outv]".to_string());
        }
        if has_audio {
            args.push("-map".to_string());
            args.push("[outa]".to_string());
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(duration: f64, has_audio: bool, has_video: bool) -> MediaAsset {
        MediaAsset {
            path: PathBuf::from("clip.mp4"),
            has_audio,
            has_video,
            duration_secs: duration,
        }
    }

    #[test]
    fn test_plan_short_asset_single_chunk() {
        let config = SegmentationConfig::default();
        let engine = SegmentationEngine::new(&config);
        // Audio path short-circuits before decoding, so no ffmpeg runs
        let chunks = engine.plan(&asset(4.2, true, true)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].intervals[0], TimeInterval::new(0.0, 4.2));
    }

    #[test]
    fn test_plan_video_only_uses_fixed_windows() {
        let config = SegmentationConfig::default();
        let engine = SegmentationEngine::new(&config);
        let chunks = engine.plan(&asset(13.0, false, true)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].intervals[0], TimeInterval::new(12.0, 13.0));
    }

    #[test]
    fn test_plan_empty_asset() {
        let config = SegmentationConfig::default();
        let engine = SegmentationEngine::new(&config);
        assert!(engine.plan(&asset(0.0, false, true)).unwrap().is_empty());
    }

    #[test]
    fn test_extract_args_single_interval() {
        let chunk = Chunk::single(1.5, 6.0);
        let args = extract_args(
            Path::new("in.mp4"),
            &chunk,
            true,
            true,
            Path::new("out/in_chunk_0.mp4"),
        );
        assert_eq!(
            args,
            vec![
                "-ss", "1.500", "-to", "6.000", "-i", "in.mp4", "out/in_chunk_0.mp4"
            ]
        );
    }

    #[test]
    fn test_extract_args_concat_intervals() {
        let chunk = Chunk {
            intervals: vec![TimeInterval::new(0.0, 2.0), TimeInterval::new(3.0, 4.0)],
        };
        let args = extract_args(
            Path::new("in.mp4"),
            &chunk,
            true,
            true,
            Path::new("out.mp4"),
        );
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        let filter = &args[filter_pos + 1];
        assert!(filter.contains("concat=n=2:v=1:a=1"));
        assert!(filter.starts_with("[0:v:0][0:a:0][1:v:0][1:a:0]"));
        assert!(args.contains(&"[outv]".to_string()));
        assert!(args.contains(&"[outa]".to_string()));
    }

    #[test]
    fn test_extract_args_audio_only_concat() {
        let chunk = Chunk {
            intervals: vec![TimeInterval::new(0.0, 2.0), TimeInterval::new(3.0, 4.0)],
        };
        let args = extract_args(
            Path::new("in.mp4"),
            &chunk,
            false,
            true,
            Path::new("out.mp4"),
        );
        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        let filter = &args[filter_pos + 1];
        assert!(filter.contains("concat=n=2:v=0:a=1"));
        assert!(!filter.contains(":v:0]"));
        assert!(!args.contains(&"[outv]".to_string()));
    }
}
