use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hitcrab_core::EngineConfig;
use hitcrab_core::checkpoint::{CheckpointStorage, FsCheckpointStorage};
use hitcrab_core::connector::SourceConnector;
use hitcrab_core::metrics::MetricsSnapshot;
use hitcrab_core::runtime::AggregationPipeline;
use tracing_subscriber::EnvFilter;

mod decode;
mod sink;
mod source;

use decode::JsonHitDecoder;
use sink::SqliteSink;
use source::FileSource;

#[derive(Parser, Debug)]
#[command(name = "hitcrab")]
#[command(about = "Windowed per-host hit counts with checkpointed recovery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Aggregate the input files into the sink, resuming from the latest checkpoint.
    Run(RunArgs),
    /// List complete checkpoints and their source offsets.
    Checkpoints {
        #[arg(long, env = "HITCRAB_CHECKPOINT_DIR")]
        checkpoint_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON-lines input, one file per partition.
    #[arg(long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,
    /// SQLite database receiving `processed_events_aggregated`.
    #[arg(long, env = "HITCRAB_SINK")]
    sink: PathBuf,
    #[arg(long, env = "HITCRAB_CHECKPOINT_DIR")]
    checkpoint_dir: PathBuf,
    #[arg(long, env = "HITCRAB_WINDOW_SIZE_SECS", default_value_t = 300)]
    window_size_secs: u64,
    #[arg(long, env = "HITCRAB_ALLOWED_LATENESS_SECS", default_value_t = 15)]
    allowed_lateness_secs: u64,
    #[arg(long, env = "HITCRAB_CHECKPOINT_INTERVAL_MS", default_value_t = 10)]
    checkpoint_interval_ms: u64,
    #[arg(long, env = "HITCRAB_PARALLELISM", default_value_t = 3)]
    parallelism: usize,
    /// Emit every open window once the input is exhausted.
    #[arg(long, default_value_t = false)]
    drain_on_eof: bool,
}

impl RunArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_window_size(Duration::from_secs(self.window_size_secs))
            .with_allowed_lateness(Duration::from_secs(self.allowed_lateness_secs))
            .with_checkpoint_interval(Duration::from_millis(self.checkpoint_interval_ms))
            .with_parallelism(self.parallelism)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let shutdown = Arc::new(AtomicBool::new(false));
            tokio::spawn({
                let shutdown = Arc::clone(&shutdown);
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received, shutting down");
                        shutdown.store(true, Ordering::SeqCst);
                    }
                }
            });
            let metrics = tokio::task::spawn_blocking(move || run_pipeline(args, &shutdown))
                .await
                .context("pipeline thread panicked")??;
            println!("{metrics}");
        }
        Commands::Checkpoints { checkpoint_dir } => list_checkpoints(&checkpoint_dir)?,
    }
    Ok(())
}

fn run_pipeline(args: RunArgs, shutdown: &AtomicBool) -> anyhow::Result<MetricsSnapshot> {
    let config = args.engine_config();
    let storage = Arc::new(FsCheckpointStorage::new(&args.checkpoint_dir)?);
    let sink = Arc::new(SqliteSink::open(&args.sink)?);
    let mut source = FileSource::open(args.input.as_slice())?;
    let decoder = JsonHitDecoder::new();

    let mut pipeline = AggregationPipeline::start(config, storage, sink, &mut source)?;
    match pipeline.recovered_from() {
        Some(checkpoint_id) => tracing::info!(
            "resumed from checkpoint {} at offsets {:?}",
            checkpoint_id,
            pipeline.offsets()
        ),
        None => tracing::info!("no checkpoint found, starting from the beginning"),
    }

    pipeline.run(&mut source, &decoder, shutdown)?;
    if args.drain_on_eof && source.is_exhausted() {
        pipeline.drain()?;
    }
    pipeline.shutdown(&mut source)
}

fn list_checkpoints(checkpoint_dir: &Path) -> anyhow::Result<()> {
    let storage = FsCheckpointStorage::new(checkpoint_dir)?;
    let ids = storage.list_checkpoints()?;
    println!("checkpoints={}", ids.len());
    for checkpoint_id in ids {
        let metadata = storage.load_checkpoint(checkpoint_id)?;
        println!(
            "checkpoint_id={} created_at_ms={} window_size_ms={} parallelism={} offsets={:?}",
            metadata.checkpoint_id,
            metadata.created_at,
            metadata.window_size_ms,
            metadata.parallelism,
            metadata.input_offsets
        );
    }
    Ok(())
}
