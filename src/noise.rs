//! Synthetic video degradation
//!
//! Adds Gaussian pixel noise scaled by a 0-100 SNR knob: every channel of
//! a [0,1]-normalized frame receives independent noise with standard
//! deviation `(100 - snr) / 100`. An SNR of 100 is an exact no-op. Whole
//! files are degraded by decoding, transforming and re-encoding each frame
//! while the source audio track is carried over untouched; the final path
//! is only written on full success.

use crate::media::command::{run_ffmpeg, ToolError};
use crate::media::{probe_video_params, MediaAsset};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;

/// Noise injection failures
#[derive(Error, Debug)]
pub enum NoiseError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid noise parameters: {0}")]
    InvalidParams(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Noise standard deviation for a given SNR, on [0,1]-normalized pixels.
/// Monotonic: lower SNR means more noise.
pub fn sigma_for_snr(snr: u8) -> f64 {
    (100.0 - f64::from(snr.min(100))) / 100.0
}

/// Degrade one raw frame in place. `snr == 100` leaves the buffer
/// bit-identical; anything lower perturbs every channel independently.
pub fn inject_frame(data: &mut [u8], snr: u8, rng: &mut impl Rng) -> Result<(), NoiseError> {
    if snr >= 100 {
        return Ok(());
    }
    let sigma = sigma_for_snr(snr);
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| NoiseError::InvalidParams(format!("sigma {sigma}: {e}")))?;
    for value in data.iter_mut() {
        let normalized = f64::from(*value) / 255.0;
        let noisy = (normalized + normal.sample(rng)).clamp(0.0, 1.0);
        *value = (noisy * 255.0).round() as u8;
    }
    Ok(())
}

/// FFmpeg decoder streaming raw rgb24 frames from a video file
struct FrameDecoder {
    process: Child,
    stdout: BufReader<std::process::ChildStdout>,
    frame_size: usize,
}

impl FrameDecoder {
    fn open(path: &Path, width: u32, height: u32) -> Result<Self, NoiseError> {
        let mut process = Command::new("ffmpeg")
            .args([
                "-i",
                &path.to_string_lossy(),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NoiseError::Decode(format!("failed to start decoder: {e}")))?;

        let frame_size = (width * height * 3) as usize;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| NoiseError::Decode("failed to capture decoder stdout".to_string()))?;
        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            frame_size,
        })
    }

    /// Read the next frame; `None` once the stream ends
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NoiseError> {
        let mut buffer = vec![0u8; self.frame_size];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Ok(Some(buffer)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(NoiseError::Decode(format!("failed to read frame: {e}"))),
        }
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// FFmpeg encoder consuming raw rgb24 frames on stdin
struct FrameEncoder {
    process: Option<Child>,
}

impl FrameEncoder {
    fn open(output: &Path, width: u32, height: u32, fps: f64) -> Result<Self, NoiseError> {
        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                &output.to_string_lossy(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NoiseError::Encode(format!("failed to start encoder: {e}")))?;
        Ok(Self {
            process: Some(process),
        })
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), NoiseError> {
        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| NoiseError::Encode("encoder stdin closed".to_string()))?;
        stdin
            .write_all(data)
            .map_err(|e| NoiseError::Encode(format!("failed to write frame: {e}")))
    }

    fn finish(mut self) -> Result<(), NoiseError> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| NoiseError::Encode("encoder already finished".to_string()))?;
        drop(process.stdin.take());
        let output = process
            .wait_with_output()
            .map_err(|e| NoiseError::Encode(format!("failed to wait for encoder: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NoiseError::Encode(format!(
                "encoder exited with {}: {}",
                output.status, stderr
            )));
        }
        Ok(())
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// SNR-controlled file degradation
pub struct NoiseInjector {
    timeout: Duration,
}

impl NoiseInjector {
    pub fn new() -> Self {
        Self {
            timeout: crate::config::TOOL_TIMEOUT,
        }
    }

    /// Produce a degraded copy of `asset` at `output`.
    ///
    /// `snr >= 100` short-circuits to the source path without touching any
    /// file. Otherwise every frame is decoded, degraded and re-encoded;
    /// frame count, resolution and frame rate carry over, and the audio
    /// track (if present) is extracted once and re-attached unchanged. All
    /// intermediate work happens in scratch files so `output` either holds
    /// a complete result or nothing.
    pub fn degrade_file(
        &self,
        asset: &MediaAsset,
        snr: u8,
        output: &Path,
    ) -> Result<PathBuf, NoiseError> {
        if snr >= 100 {
            tracing::debug!("snr 100, skipping degradation of {:?}", asset.path);
            return Ok(asset.path.clone());
        }

        let params = probe_video_params(&asset.path, self.timeout)?;
        let scratch = tempfile::Builder::new()
            .prefix("avprep-noise-")
            .tempdir_in(output.parent().unwrap_or_else(|| Path::new(".")))?;

        // Audio is pulled out once, before video re-encode, and re-attached
        // verbatim afterwards; noise never applies to it.
        let audio_scratch = scratch.path().join("audio.m4a");
        if asset.has_audio {
            let args = vec![
                "-i".to_string(),
                asset.path.to_string_lossy().into_owned(),
                "-vn".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                audio_scratch.to_string_lossy().into_owned(),
            ];
            run_ffmpeg(&args, self.timeout)?;
        }

        let video_scratch = scratch.path().join("video.mp4");
        let mut rng = StdRng::from_entropy();
        let frames = self.transcode_with_noise(
            &asset.path,
            &video_scratch,
            params.width,
            params.height,
            params.fps,
            snr,
            &mut rng,
        )?;
        tracing::info!(
            "degraded {} frames of {:?} at snr {}",
            frames,
            asset.path,
            snr
        );

        let final_scratch = if asset.has_audio {
            let merged = scratch.path().join("merged.mp4");
            let args = vec![
                "-i".to_string(),
                video_scratch.to_string_lossy().into_owned(),
                "-i".to_string(),
                audio_scratch.to_string_lossy().into_owned(),
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "1:a:0".to_string(),
                "-c".to_string(),
                "copy".to_string(),
                merged.to_string_lossy().into_owned(),
            ];
            run_ffmpeg(&args, self.timeout)?;
            merged
        } else {
            video_scratch
        };

        // Promote to the final path only now that everything succeeded
        match std::fs::rename(&final_scratch, output) {
            Ok(()) => {}
            Err(_) => {
                std::fs::copy(&final_scratch, output)?;
            }
        }
        Ok(output.to_path_buf())
    }

    #[allow(clippy::too_many_arguments)]
    fn transcode_with_noise(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
        snr: u8,
        rng: &mut impl Rng,
    ) -> Result<u64, NoiseError> {
        let mut decoder = FrameDecoder::open(input, width, height)?;
        let mut encoder = FrameEncoder::open(output, width, height, fps)?;

        let mut frames = 0u64;
        while let Some(mut frame) = decoder.read_frame()? {
            inject_frame(&mut frame, snr, rng)?;
            encoder.write_frame(&frame)?;
            frames += 1;
        }
        encoder.finish()?;
        Ok(frames)
    }
}

impl Default for NoiseInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_std(original: &[u8], noisy: &[u8]) -> f64 {
        let diffs: Vec<f64> = original
            .iter()
            .zip(noisy)
            .map(|(&a, &b)| (f64::from(b) - f64::from(a)) / 255.0)
            .collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let var = diffs.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / diffs.len() as f64;
        var.sqrt()
    }

    #[test]
    fn test_snr_100_is_exact_identity() {
        let original: Vec<u8> = (0..=255).cycle().take(4096).map(|v| v as u8).collect();
        let mut frame = original.clone();
        let mut rng = StdRng::seed_from_u64(7);
        inject_frame(&mut frame, 100, &mut rng).unwrap();
        assert_eq!(frame, original);
    }

    #[test]
    fn test_sigma_scaling_law() {
        assert_eq!(sigma_for_snr(100), 0.0);
        assert_eq!(sigma_for_snr(0), 1.0);
        assert!((sigma_for_snr(60) - 0.4).abs() < 1e-12);
        // Monotonic: lower snr, larger sigma
        for snr in 1..=100u8 {
            assert!(sigma_for_snr(snr - 1) > sigma_for_snr(snr));
        }
    }

    #[test]
    fn test_lower_snr_means_visibly_more_noise() {
        // Constant mid-gray frame so the measured spread comes entirely
        // from the injected noise
        let original = vec![128u8; 64 * 64 * 3];

        let mut noisy_80 = original.clone();
        inject_frame(&mut noisy_80, 80, &mut StdRng::seed_from_u64(42)).unwrap();
        let mut noisy_40 = original.clone();
        inject_frame(&mut noisy_40, 40, &mut StdRng::seed_from_u64(42)).unwrap();

        let std_80 = sample_std(&original, &noisy_80);
        let std_40 = sample_std(&original, &noisy_40);
        assert!(
            std_40 > std_80,
            "std at snr 40 ({std_40:.4}) not above snr 80 ({std_80:.4})"
        );
        // And the gentler one should sit near its configured sigma
        assert!((std_80 - sigma_for_snr(80)).abs() < 0.05);
    }

    #[test]
    fn test_noise_perturbs_most_pixels() {
        let original = vec![128u8; 32 * 32 * 3];
        let mut noisy = original.clone();
        inject_frame(&mut noisy, 50, &mut StdRng::seed_from_u64(1)).unwrap();
        let changed = original
            .iter()
            .zip(&noisy)
            .filter(|(a, b)| a != b)
            .count();
        assert!(changed > original.len() / 2);
    }

    #[test]
    fn test_degrade_file_snr_100_returns_source() {
        let injector = NoiseInjector::new();
        let asset = MediaAsset {
            path: PathBuf::from("clip.mp4"),
            has_audio: true,
            has_video: true,
            duration_secs: 5.0,
        };
        let out = injector
            .degrade_file(&asset, 100, Path::new("out/clip_noisy.mp4"))
            .unwrap();
        assert_eq!(out, PathBuf::from("clip.mp4"));
    }
}
