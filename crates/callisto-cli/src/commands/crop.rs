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
    run_sequence, FrameSelection, MemoryBudget, ProcessArgs, ProcessConfig, SequenceOperation,
};
use callisto_core::seqwrite::MemoryGate;

use crate::progress::BarReporter;
use crate::summary::print_run_summary;

#[derive(Args)]
pub struct CropArgs {
    /// Input SER file
    pub file: PathBuf,

    /// Crop region as x,y,width,height
    #[arg(long, value_parser = parse_rect)]
    pub rect: Rect,

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

fn parse_rect(s: &str) -> std::result::Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err("expected x,y,width,height".into());
    }
    let mut values = [0u32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid number {part:?}: {e}"))?;
    }
    Ok(Rect {
        x: values[0],
        y: values[1],
        width: values[2],
        height: values[3],
    })
}

/// Crops each frame to the area of interest.
struct CropFrames;

impl SequenceOperation for CropFrames {
    fn describe(&self) -> &str {
        "Cropping"
    }

    fn process_frame(
        &self,
        _out_index: usize,
        _in_index: usize,
        image: ImageBuffer,
        area: Option<Rect>,
    ) -> CoreResult<ImageBuffer> {
        match area {
            Some(rect) => image.crop(&rect),
            None => Ok(image),
        }
    }
}

pub fn run(args: &CropArgs) -> Result<()> {
    let reader = SerReader::open(&args.file)?;
    let info = reader.source_info(&args.file);

    // snaps to even coordinates on Bayer sources
    let rect = args.rect.validated(info.width, info.height, &info.color_mode)?;
    println!(
        "Crop: {} ({}x{} at {},{})",
        info.filename.display(),
        rect.width,
        rect.height,
        rect.x,
        rect.y
    );

    let config = load_config(args)?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| crop_output_path(&args.file, rect.width, rect.height));
    let sink = SerSink::create(&output_path, &reader.header);

    let reporter = BarReporter::new();
    let report = run_sequence(ProcessArgs {
        source: &reader,
        operation: &CropFrames,
        sink: Some(sink),
        selection: FrameSelection::All,
        config,
        area: Some(rect),
        reporter: &reporter,
        cancel: Arc::new(AtomicBool::new(false)),
        gate: Arc::new(MemoryGate::new()),
    })?;

    print_run_summary(&report, Some(&output_path));
    Ok(())
}

fn load_config(args: &CropArgs) -> Result<ProcessConfig> {
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

fn crop_output_path(source: &Path, w: u32, h: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("ser");
    let parent = source.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_crop{w}x{h}.{ext}"))
}
