//! Silence detection
//!
//! Decodes the audio track to raw mono PCM through FFmpeg, measures the
//! file's overall dBFS, and finds quiet runs relative to it. Levels are
//! computed over short analysis windows; a run counts as silence once it
//! spans at least the configured minimum length.

use crate::media::command::{run_tool, ToolError};
use crate::segment::TimeInterval;
use std::path::Path;
use std::time::Duration;

/// Analysis window length used for per-window level measurement
const WINDOW_MS: u64 = 10;

/// Sample rate the track is decoded at for analysis
pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;

/// Decode a file's audio track to mono 16-bit PCM at the analysis rate
pub fn decode_pcm(path: &Path, timeout: Duration) -> Result<Vec<i16>, ToolError> {
    let args = vec![
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        ANALYSIS_SAMPLE_RATE.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-".to_string(),
    ];
    let output = run_tool("ffmpeg", &args, timeout)?;
    let samples = output
        .stdout
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(samples)
}

/// Root-mean-square amplitude of a sample run
fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Overall level of the track in dB relative to full scale.
/// Pure digital silence comes out as negative infinity.
pub fn dbfs(samples: &[i16]) -> f64 {
    let level = rms(samples) / (i16::MAX as f64 + 1.0);
    if level <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * level.log10()
    }
}

/// Find silence runs of at least `min_silence_ms` whose level sits below
/// `threshold_db` relative to full scale. Returned intervals are sorted,
/// disjoint, and in seconds.
pub fn detect_silence(
    samples: &[i16],
    sample_rate: u32,
    min_silence_ms: u64,
    threshold_db: f64,
) -> Vec<TimeInterval> {
    let window_len = (sample_rate as u64 * WINDOW_MS / 1000).max(1) as usize;
    let min_windows = (min_silence_ms / WINDOW_MS).max(1) as usize;

    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut window_index = 0usize;

    for window in samples.chunks(window_len) {
        let silent = dbfs(window) < threshold_db;
        match (silent, run_start) {
            (true, None) => run_start = Some(window_index),
            (false, Some(start)) => {
                if window_index - start >= min_windows {
                    runs.push((start, window_index));
                }
                run_start = None;
            }
            _ => {}
        }
        window_index += 1;
    }
    if let Some(start) = run_start {
        if window_index - start >= min_windows {
            runs.push((start, window_index));
        }
    }

    let window_secs = WINDOW_MS as f64 / 1000.0;
    runs.into_iter()
        .map(|(start, stop)| {
            TimeInterval::new(start as f64 * window_secs, stop as f64 * window_secs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    /// Alternating full-swing samples at the given amplitude
    fn tone(secs: f64, amplitude: i16) -> Vec<i16> {
        let len = (secs * RATE as f64) as usize;
        (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn test_dbfs_of_full_scale() {
        let samples = tone(0.1, i16::MAX);
        assert!(dbfs(&samples).abs() < 0.1);
    }

    #[test]
    fn test_dbfs_of_digital_silence() {
        assert_eq!(dbfs(&vec![0i16; 1600]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_detects_interior_gap() {
        let mut samples = tone(2.0, 8000);
        samples.extend(tone(1.5, 0));
        samples.extend(tone(2.0, 8000));

        let level = dbfs(&samples);
        let runs = detect_silence(&samples, RATE, 1000, level - 30.0);
        assert_eq!(runs.len(), 1);
        let run = runs[0];
        assert!((run.start_secs - 2.0).abs() < 0.05, "start {run:?}");
        assert!((run.stop_secs - 3.5).abs() < 0.05, "stop {run:?}");
    }

    #[test]
    fn test_short_gap_not_reported() {
        let mut samples = tone(2.0, 8000);
        samples.extend(tone(0.5, 0));
        samples.extend(tone(2.0, 8000));

        let level = dbfs(&samples);
        let runs = detect_silence(&samples, RATE, 1000, level - 30.0);
        assert!(runs.is_empty());
    }

    #[test]
    fn test_trailing_gap_reported() {
        let mut samples = tone(2.0, 8000);
        samples.extend(tone(1.2, 0));

        let level = dbfs(&samples);
        let runs = detect_silence(&samples, RATE, 1000, level - 30.0);
        assert_eq!(runs.len(), 1);
        assert!((runs[0].stop_secs - 3.2).abs() < 0.05);
    }

    #[test]
    fn test_uniform_loud_track_has_no_silence() {
        let samples = tone(5.0, 8000);
        let level = dbfs(&samples);
        let runs = detect_silence(&samples, RATE, 1000, level - 30.0);
        assert!(runs.is_empty());
    }
}
