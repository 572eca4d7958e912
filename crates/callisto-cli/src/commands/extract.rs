use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use callisto_core::error::Result as CoreResult;
use callisto_core::frame::{ImageBuffer, Rect};
use callisto_core::io::ser::SerReader;
use callisto_core::io::ser_writer::SerSink;
use callisto_core::process::{
    run_sequence, FrameSelection, FrameSource, MemoryBudget, ProcessArgs, ProcessConfig,
    SequenceOperation,
};
use callisto_core::seqwrite::MemoryGate;

use crate::progress::BarReporter;
use crate::summary::print_run_summary;

#[derive(Args)]
pub struct ExtractArgs {
    /// Input SER file
    pub file: PathBuf,

    /// First frame to copy (0-based)
    #[arg(long, default_value = "0")]
    pub from: usize,

    /// Last frame to copy (0-based, defaults to the last frame)
    #[arg(long)]
    pub to: Option<usize>,

    /// Keep every Nth frame
    #[arg(long, default_value = "1")]
    pub step: usize,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value = "0")]
    pub threads: usize,

    /// Memory budget in MB for in-flight frames
    #[arg(long)]
    pub memory_mb: Option<usize>,

    /// Fail on the first unreadable frame instead of skipping it
    #[arg(long)]
    pub stop_on_error: bool,

    /// Processing config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output SER file (auto-generated if not provided)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Copies frames through unchanged.
struct CopyFrames;

impl SequenceOperation for CopyFrames {
    fn describe(&self) -> &str {
        "Extracting"
    }

    fn process_frame(
        &self,
        _out_index: usize,
        _in_index: usize,
        image: ImageBuffer,
        _area: Option<Rect>,
    ) -> CoreResult<ImageBuffer> {
        Ok(image)
    }

    fn memory_per_frame(&self, source: &dyn FrameSource) -> usize {
        // a plain copy holds one decoded frame at a time
        source.frame_cost_bytes()
    }
}

pub fn run(args: &ExtractArgs) -> Result<()> {
    let reader = SerReader::open(&args.file)?;
    let total = reader.frame_count();

    let config = load_config(args)?;
    let to = args.to.unwrap_or(total.saturating_sub(1));
    let selection = FrameSelection::Range {
        from: args.from,
        to,
        step: args.step,
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| extract_output_path(&args.file, args.from, to));
    let sink = SerSink::create(&output_path, &reader.header);

    let reporter = BarReporter::new();
    let report = run_sequence(ProcessArgs {
        source: &reader,
        operation: &CopyFrames,
        sink: Some(sink),
        selection,
        config,
        area: None,
        reporter: &reporter,
        cancel: Arc::new(AtomicBool::new(false)),
        gate: Arc::new(MemoryGate::new()),
    })?;

    print_run_summary(&report, Some(&output_path));
    Ok(())
}

fn load_config(args: &ExtractArgs) -> Result<ProcessConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let parsed = toml::from_str(&contents).context("Invalid processing config")?;
            debug!(config = %path.display(), "loaded processing config");
            parsed
        }
        None => ProcessConfig::default(),
    };

    // command line flags override the config file
    if args.threads > 0 {
        config.max_threads = args.threads;
    }
    if let Some(mb) = args.memory_mb {
        config.memory = MemoryBudget { budget_mb: mb };
    }
    if args.stop_on_error {
        config.stop_on_error = true;
    }
    Ok(config)
}

fn extract_output_path(source: &Path, from: usize, to: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("ser");
    let parent = source.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_{from}-{to}.{ext}"))
}
