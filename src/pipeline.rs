//! Batch preparation pipeline
//!
//! Drives Probe -> Noise -> Segmentation -> Conversion for a batch of
//! input files and produces, per input, the ordered list of prepared chunk
//! files handed to the external predictor. A chunk that fails conversion
//! stays in the batch marked failed; it is never silently dropped.

use crate::config::PipelineConfig;
use crate::convert::{ConvertError, FormatConversionAdapter, ProcessingMode};
use crate::media::{self, MediaAsset, ToolError};
use crate::noise::{NoiseError, NoiseInjector};
use crate::segment::{SegmentError, SegmentationEngine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How the caller picks the per-file processing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    /// Each file keeps its natural mode (both streams -> audio-video)
    Preferred,
    /// Force one mode; files missing a required stream are rejected
    Fixed(ProcessingMode),
}

/// Pipeline failures for a single input file
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Noise(#[from] NoiseError),

    #[error("{0:?} has no audio or video stream")]
    NoStreams(PathBuf),

    #[error("{path:?} cannot be processed as {mode}")]
    ModeMismatch { path: PathBuf, mode: ProcessingMode },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One prepared chunk, successful or not
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Ready { chunk: PathBuf, output: PathBuf },
    Failed { chunk: PathBuf, error: String },
}

impl ChunkOutcome {
    pub fn output(&self) -> Option<&Path> {
        match self {
            ChunkOutcome::Ready { output, .. } => Some(output.as_path()),
            ChunkOutcome::Failed { .. } => None,
        }
    }
}

/// Everything prepared for one input file
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub source: PathBuf,
    pub mode: ProcessingMode,
    pub chunks: Vec<ChunkOutcome>,
}

impl PreparedFile {
    /// Ordered paths of the chunks that converted cleanly
    pub fn ready_chunks(&self) -> Vec<PathBuf> {
        self.chunks
            .iter()
            .filter_map(|c| c.output().map(Path::to_path_buf))
            .collect()
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, ChunkOutcome::Failed { .. }))
            .count()
    }
}

/// Result of a batch run
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub files: Vec<PreparedFile>,
    /// Inputs that failed before chunking, with the reason
    pub rejected: Vec<(PathBuf, String)>,
}

impl PreparedBatch {
    /// The mapping handed to the external predictor:
    /// original path -> ordered prepared chunk paths
    pub fn handoff(&self) -> HashMap<PathBuf, Vec<PathBuf>> {
        self.files
            .iter()
            .map(|f| (f.source.clone(), f.ready_chunks()))
            .collect()
    }
}

/// The natural processing mode of a probed file
pub fn natural_mode(asset: &MediaAsset) -> Option<ProcessingMode> {
    match (asset.has_audio, asset.has_video) {
        (true, true) => Some(ProcessingMode::AudioVideo),
        (false, true) => Some(ProcessingMode::VideoOnly),
        (true, false) => Some(ProcessingMode::AudioOnly),
        (false, false) => None,
    }
}

/// Resolve the effective mode for one file under a selection policy
pub fn resolve_mode(
    asset: &MediaAsset,
    selection: ModeSelection,
) -> Result<ProcessingMode, PipelineError> {
    let natural = natural_mode(asset).ok_or_else(|| PipelineError::NoStreams(asset.path.clone()))?;
    match selection {
        ModeSelection::Preferred => Ok(natural),
        ModeSelection::Fixed(mode) => {
            let compatible = (!mode.wants_audio() || asset.has_audio)
                && (!mode.wants_video() || asset.has_video);
            if compatible {
                Ok(mode)
            } else {
                Err(PipelineError::ModeMismatch {
                    path: asset.path.clone(),
                    mode,
                })
            }
        }
    }
}

/// Orchestrates preparation for a batch of files
pub struct PipelineDriver {
    config: PipelineConfig,
    work_dir: PathBuf,
}

impl PipelineDriver {
    pub fn new(config: PipelineConfig, work_dir: PathBuf) -> Self {
        Self { config, work_dir }
    }

    /// Prepare every input. Per-file failures land in `rejected`; per-chunk
    /// failures stay inside the file's chunk list.
    pub fn prepare(&self, inputs: &[PathBuf], selection: ModeSelection) -> PreparedBatch {
        let mut batch = PreparedBatch::default();
        for (index, input) in inputs.iter().enumerate() {
            match self.prepare_file(index, input, selection) {
                Ok(prepared) => {
                    tracing::info!(
                        "prepared {:?}: {} chunks ready, {} failed",
                        input,
                        prepared.ready_chunks().len(),
                        prepared.failed_chunks()
                    );
                    batch.files.push(prepared);
                }
                Err(e) => {
                    tracing::error!("rejected {:?}: {e}", input);
                    batch.rejected.push((input.clone(), e.to_string()));
                }
            }
        }
        batch
    }

    fn prepare_file(
        &self,
        index: usize,
        input: &Path,
        selection: ModeSelection,
    ) -> Result<PreparedFile, PipelineError> {
        let timeout = crate::config::TOOL_TIMEOUT;
        let asset = media::probe(input, timeout)?;
        let mode = resolve_mode(&asset, selection)?;

        let file_dir = self.file_work_dir(index, input);
        std::fs::create_dir_all(&file_dir)?;

        // Optional degradation happens before chunking so every chunk
        // inherits the same noise level
        let working_asset = if self.config.video_snr < 100 && asset.has_video {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());
            let noisy_path = file_dir.join(format!("{stem}_noisy.mp4"));
            let injector = NoiseInjector::new();
            let degraded = injector.degrade_file(&asset, self.config.video_snr, &noisy_path)?;
            media::probe(&degraded, timeout)?
        } else {
            asset
        };

        let engine = SegmentationEngine::new(&self.config.segmentation);
        let chunk_paths = engine.split(&working_asset, &file_dir)?;

        let adapter = FormatConversionAdapter::new(&self.config.conversion);
        let mut chunks = Vec::with_capacity(chunk_paths.len());
        for chunk_path in chunk_paths {
            let outcome = media::probe(&chunk_path, timeout)
                .map_err(ConvertError::from)
                .and_then(|chunk_asset| adapter.convert(&chunk_asset, mode));
            match outcome {
                Ok(output) => chunks.push(ChunkOutcome::Ready {
                    chunk: chunk_path,
                    output,
                }),
                Err(e) => {
                    tracing::warn!("chunk {:?} failed conversion: {e}", chunk_path);
                    chunks.push(ChunkOutcome::Failed {
                        chunk: chunk_path,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(PreparedFile {
            source: input.to_path_buf(),
            mode,
            chunks,
        })
    }

    /// Scratch dir for one input: indexed so same-named inputs never collide
    fn file_work_dir(&self, index: usize, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        self.work_dir.join(format!("{index:03}_{stem}"))
    }
}
