//! avprep command-line entry point

use anyhow::Context;
use avprep::capture::DeviceRegistry;
use avprep::pipeline::{ModeSelection, PipelineDriver};
use avprep::{PipelineConfig, ProcessingMode, RecordingKind, RecordingSessionController};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avprep", version, about = "Capture and prepare media for speech recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Preferred,
    AudioOnly,
    VideoOnly,
    AudioVideo,
}

impl From<ModeArg> for ModeSelection {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Preferred => ModeSelection::Preferred,
            ModeArg::AudioOnly => ModeSelection::Fixed(ProcessingMode::AudioOnly),
            ModeArg::VideoOnly => ModeSelection::Fixed(ProcessingMode::VideoOnly),
            ModeArg::AudioVideo => ModeSelection::Fixed(ProcessingMode::AudioVideo),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    AudioOnly,
    VideoOnly,
    AudioVideo,
}

impl From<KindArg> for RecordingKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::AudioOnly => RecordingKind::AudioOnly,
            KindArg::VideoOnly => RecordingKind::VideoOnly,
            KindArg::AudioVideo => RecordingKind::AudioVideo,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record from the camera/microphone until interrupted, then merge
    Record {
        /// What to capture
        #[arg(long, value_enum, default_value = "audio-video")]
        kind: KindArg,

        /// Directory merged recordings are persisted to
        #[arg(long, default_value = "recordings")]
        storage_dir: PathBuf,
    },
    /// Segment and convert media files for the predictor
    Prepare {
        /// Input media files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Channel selection applied during conversion
        #[arg(long, value_enum, default_value = "preferred")]
        mode: ModeArg,

        /// Video noise SNR in [0, 100]; 100 disables degradation
        #[arg(long, default_value_t = 100)]
        video_snr: u8,

        /// Scratch directory for chunks and converted output
        #[arg(long, default_value = "prepared")]
        work_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avprep=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Record { kind, storage_dir } => record(kind.into(), storage_dir).await,
        Commands::Prepare {
            inputs,
            mode,
            video_snr,
            work_dir,
        } => prepare(inputs, mode.into(), video_snr, work_dir).await,
    }
}

async fn record(kind: RecordingKind, storage_dir: PathBuf) -> anyhow::Result<()> {
    let config = PipelineConfig::default();
    let registry = DeviceRegistry::new();
    let mut session =
        RecordingSessionController::new(kind, storage_dir, &config.capture, registry);

    session.start().await.context("failed to start recording")?;
    tracing::info!("recording... press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for interrupt")?;

    let output = session.stop().await.context("recording failed")?;
    tracing::info!(
        "recorded {:.1}s -> {:?}",
        session.duration_secs(),
        output
    );
    println!("{}", output.display());
    Ok(())
}

async fn prepare(
    inputs: Vec<PathBuf>,
    selection: ModeSelection,
    video_snr: u8,
    work_dir: PathBuf,
) -> anyhow::Result<()> {
    let config = PipelineConfig {
        video_snr: video_snr.min(100),
        ..Default::default()
    };
    let driver = PipelineDriver::new(config, work_dir);

    let batch = tokio::task::spawn_blocking(move || driver.prepare(&inputs, selection))
        .await
        .context("preparation task panicked")?;

    for file in &batch.files {
        println!("{}", file.source.display());
        for chunk in file.ready_chunks() {
            println!("  {}", chunk.display());
        }
        if file.failed_chunks() > 0 {
            eprintln!("  ({} chunks failed)", file.failed_chunks());
        }
    }
    for (path, reason) in &batch.rejected {
        eprintln!("rejected {}: {reason}", path.display());
    }

    if !batch.rejected.is_empty() {
        anyhow::bail!("{} input(s) rejected", batch.rejected.len());
    }
    Ok(())
}
