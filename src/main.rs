//! Submission Inference CLI
//!
//! Entry point for producing a submission file from a directory of images
//! and a trained checkpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use submission_infer::dataset::scan_directory;
use submission_infer::pipeline::{self, RunSummary};
use submission_infer::utils::format_duration;
use submission_infer::utils::logging::{init_logging, LogConfig};
use submission_infer::PredictConfig;

/// Batched top-3 image classification
///
/// Scores every image in a directory with a trained Burn network and writes
/// the three best classes per image to a fresh submission file.
#[derive(Parser, Debug)]
#[command(name = "submission_infer")]
#[command(author = "Warre Snaet")]
#[command(version)]
#[command(about = "Batched top-3 image classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors and hide progress bars
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every image in the data directory and write a submission
    Predict(PredictArgs),

    /// Validate the data directory without running the network
    Scan {
        /// Directory holding the images
        #[arg(short, long, default_value = "data/Public")]
        data_dir: PathBuf,

        /// List the ids of corrupted entries
        #[arg(long, default_value = "false")]
        show_corrupted: bool,
    },
}

/// Options of the `predict` command.
///
/// Values given here override the TOML file, which overrides the defaults.
#[derive(Args, Debug, Default)]
struct PredictArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the images to classify
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory holding the trained weights
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Directory receiving the submission file
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Images per inference call
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Thread hint (logged only)
    #[arg(long)]
    num_threads: Option<usize>,

    /// Square resolution images are resized to
    #[arg(long)]
    image_size: Option<usize>,

    /// Network to instantiate (cnn, cnn_lite)
    #[arg(short, long)]
    net: Option<String>,

    /// Number of classes the network scores
    #[arg(long)]
    num_classes: Option<usize>,

    /// Batches decoded ahead of inference
    #[arg(long)]
    prefetch_batches: Option<usize>,

    /// Size of the decode worker pool
    #[arg(long)]
    decode_workers: Option<usize>,

    /// Device placement leniency (accepted, no effect)
    #[arg(long)]
    allow_soft_placement: Option<bool>,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl PredictArgs {
    /// Layer the command-line values over the file (or default) config
    fn resolve(&self) -> Result<PredictConfig> {
        let mut config = match &self.config {
            Some(path) => PredictConfig::from_toml_file(path)?,
            None => PredictConfig::default(),
        };

        if let Some(v) = &self.data_dir {
            config.data_dir = v.clone();
        }
        if let Some(v) = &self.checkpoint_dir {
            config.checkpoint_dir = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.num_threads {
            config.num_threads = v;
        }
        if let Some(v) = self.image_size {
            config.image_size = v;
        }
        if let Some(v) = &self.net {
            config.net = v.clone();
        }
        if let Some(v) = self.num_classes {
            config.num_classes = v;
        }
        if let Some(v) = self.prefetch_batches {
            config.prefetch_batches = v;
        }
        if self.decode_workers.is_some() {
            config.decode_workers = self.decode_workers;
        }
        if let Some(v) = self.allow_soft_placement {
            config.allow_soft_placement = v;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);
    let show_progress = log_config.show_progress();

    if !cli.quiet {
        print_banner();
    }

    match cli.command {
        Commands::Predict(args) => cmd_predict(&args, show_progress)?,
        Commands::Scan {
            data_dir,
            show_corrupted,
        } => cmd_scan(&data_dir, show_corrupted, show_progress)?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   Submission Inference                                     |
 |   Batched top-3 image classification with Burn + Rust      |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_predict(args: &PredictArgs, show_progress: bool) -> Result<()> {
    let config = args.resolve()?;

    println!("{}", "Configuration:".cyan().bold());
    println!("  Data:        {}", config.data_dir.display());
    println!("  Checkpoint:  {}", config.checkpoint_dir.display());
    println!("  Output:      {}", config.output_dir.display());
    println!("  Network:     {}", config.net);
    println!("  Batch size:  {}", config.batch_size);
    println!("  Image size:  {}", config.image_size);
    println!();

    let start = Instant::now();
    let summary = pipeline::run(&config, show_progress).context("Prediction run failed")?;
    let elapsed = start.elapsed().as_secs_f64();

    print_summary(&summary, elapsed);

    if let Some(path) = &args.summary {
        write_summary(&summary, path)?;
        info!("Summary written to {:?}", path);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, elapsed: f64) {
    println!();
    println!("{}", "Run complete".green().bold());
    println!("  Scored:      {} images in {} batches", summary.usable, summary.batches);
    println!("  Corrupted:   {} (fallback prediction)", summary.corrupted);
    println!("  Duration:    {}", format_duration(elapsed));
    println!("  Submission:  {}", summary.output_path.display().to_string().bold());
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn cmd_scan(data_dir: &Path, show_corrupted: bool, show_progress: bool) -> Result<()> {
    info!("Validating input directory: {:?}", data_dir);

    let result = scan_directory(data_dir, show_progress)?;

    println!("{}", "Input directory:".cyan().bold());
    println!("  Entries:     {}", result.total());
    println!("  Usable:      {}", result.usable.len().to_string().green());
    println!("  Corrupted:   {}", result.corrupted.len().to_string().yellow());

    if show_corrupted && !result.corrupted.is_empty() {
        println!();
        println!("{}", "Corrupted entries:".yellow());
        for id in &result.corrupted {
            println!("  {}", id);
        }
    }

    Ok(())
}
