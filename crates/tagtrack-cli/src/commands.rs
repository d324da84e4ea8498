//! Subcommands and their shared run arguments.

use clap::{Args, Subcommand};

use tagtrack_core::{TrainingBackend, TrainingConfig};

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Queue a training run and follow it until it finishes
    Train {
        #[command(flatten)]
        run: RunArgs,

        /// Trainer script for the selected backend (overrides the environment)
        #[arg(long = "trainer-script")]
        trainer_script: Option<String>,

        /// Simulate the run even when a trainer script is configured
        #[arg(long = "dry-run", conflicts_with = "trainer_script")]
        dry_run: bool,

        /// Print task events as JSON lines instead of a progress bar
        #[arg(long)]
        json: bool,
    },

    /// Print how many optimizer steps a run would take
    Steps {
        #[command(flatten)]
        run: RunArgs,
    },

    /// List training backends and their presets
    Backends,
}

/// Everything that describes one training run.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Training backend
    #[arg(short, long, default_value = "musubi.qwen_image")]
    pub backend: TrainingBackend,

    /// Display name of the run
    #[arg(short, long)]
    pub name: String,

    /// Dataset identifier
    #[arg(short, long)]
    pub dataset: String,

    /// Image count; read from --datasets-dir when omitted
    #[arg(long = "dataset-size")]
    pub dataset_size: Option<u64>,

    #[arg(long)]
    pub repeats: Option<u32>,

    #[arg(long)]
    pub epochs: Option<u32>,

    #[arg(long = "batch-size")]
    pub batch_size: Option<u32>,

    #[arg(long = "grad-accum")]
    pub grad_accum: Option<u32>,

    /// Training resolution as "W,H"
    #[arg(long)]
    pub resolution: Option<String>,

    /// Learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    /// Base model checkpoint passed to the trainer
    #[arg(long = "base-model")]
    pub base_model: Option<String>,

    /// Prompt for periodic sample images
    #[arg(long = "sample-prompt")]
    pub sample_prompt: Option<String>,

    /// Accelerator index the trainer is pinned to
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,
}

impl RunArgs {
    /// Backend preset with every given flag applied on top.
    pub fn to_config(&self) -> TrainingConfig {
        let mut cfg = TrainingConfig::new(
            self.backend,
            self.name.clone(),
            self.dataset.clone(),
            self.dataset_size.unwrap_or(0),
        )
        .with_gpu_index(self.gpu);

        if let Some(repeats) = self.repeats {
            cfg = cfg.with_repeats(repeats);
        }
        if let Some(epochs) = self.epochs {
            cfg = cfg.with_epochs(epochs);
        }
        if let Some(batch_size) = self.batch_size {
            cfg = cfg.with_batch_size(batch_size);
        }
        if let Some(grad_accum) = self.grad_accum {
            cfg = cfg.with_grad_accum(grad_accum);
        }
        if let Some(resolution) = &self.resolution {
            cfg = cfg.with_resolution(resolution.as_str());
        }
        if let Some(lr) = self.lr {
            cfg = cfg.with_lr(lr);
        }
        if let Some(base_model) = &self.base_model {
            cfg = cfg.with_base_model(base_model.as_str());
        }
        if let Some(prompt) = &self.sample_prompt {
            cfg = cfg.with_sample_prompt(prompt.as_str());
        }
        cfg
    }
}
