//! Top-level argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Queue and monitor LoRA training runs.
#[derive(Parser)]
#[command(name = "tagtrack")]
#[command(about = "Queue and monitor LoRA training runs")]
#[command(version)]
pub struct Cli {
    /// Directory holding one sub-directory per dataset
    #[arg(long = "datasets-dir", env = "TAGTRACK_DATASETS_DIR", global = true)]
    pub datasets_dir: Option<PathBuf>,

    /// Jobs allowed to run at once (overrides TAGTRACK_MAX_WORKERS)
    #[arg(long = "max-workers", global = true)]
    pub max_workers: Option<usize>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
