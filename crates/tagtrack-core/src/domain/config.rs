//! Typed description of one training run.

use serde::{Deserialize, Serialize};

use super::backend::TrainingBackend;
use crate::ports::TrainingError;

/// Everything needed to size a training run and build its command line.
///
/// Created with the backend's preset applied, adjusted with the `with_*`
/// builders, then treated as immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub backend: TrainingBackend,
    pub name: String,
    pub dataset_id: String,
    /// Image count captured when the run was configured.
    pub dataset_size: u64,
    pub repeats: u32,
    pub epochs: u32,
    pub batch_size: u32,
    pub grad_accum: u32,
    /// `"W,H"` in pixels.
    pub resolution: String,
    pub base_model: Option<String>,
    pub optimizer: String,
    pub lr: f64,
    pub scheduler: String,
    pub warmup_ratio: f64,
    pub weight_decay: f64,
    pub precision: String,
    pub sample_prompt: Option<String>,
    pub sample_every_n_steps: Option<u32>,
    pub sample_resolution: String,
    pub sample_num_images: u32,
    pub gpu_index: u32,
}

impl TrainingConfig {
    /// New configuration with `backend`'s preset applied, one repeat and one epoch.
    pub fn new(
        backend: TrainingBackend,
        name: impl Into<String>,
        dataset_id: impl Into<String>,
        dataset_size: u64,
    ) -> Self {
        let preset = backend.preset();
        Self {
            backend,
            name: name.into(),
            dataset_id: dataset_id.into(),
            dataset_size,
            repeats: 1,
            epochs: 1,
            batch_size: preset.batch_size,
            grad_accum: preset.grad_accum,
            resolution: preset.resolution.to_string(),
            base_model: None,
            optimizer: preset.optimizer.to_string(),
            lr: preset.lr,
            scheduler: preset.scheduler.to_string(),
            warmup_ratio: preset.warmup_ratio,
            weight_decay: preset.weight_decay,
            precision: preset.precision.to_string(),
            sample_prompt: None,
            sample_every_n_steps: Some(preset.sample_every_n_steps),
            sample_resolution: preset.sample_resolution.to_string(),
            sample_num_images: preset.sample_num_images,
            gpu_index: 0,
        }
    }

    #[must_use]
    pub const fn with_dataset_size(mut self, dataset_size: u64) -> Self {
        self.dataset_size = dataset_size;
        self
    }

    #[must_use]
    pub const fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    #[must_use]
    pub const fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_grad_accum(mut self, grad_accum: u32) -> Self {
        self.grad_accum = grad_accum;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    #[must_use]
    pub fn with_base_model(mut self, base_model: impl Into<String>) -> Self {
        self.base_model = Some(base_model.into());
        self
    }

    #[must_use]
    pub const fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    #[must_use]
    pub fn with_sample_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.sample_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub const fn with_gpu_index(mut self, gpu_index: u32) -> Self {
        self.gpu_index = gpu_index;
        self
    }

    /// Optimizer steps in one pass over the repeated dataset.
    ///
    /// Zero-valued repeat, batch and accumulation factors count as one, so
    /// this never divides by zero.
    #[must_use]
    pub const fn steps_per_epoch(&self) -> u64 {
        let images = self.dataset_size.saturating_mul(max1(self.repeats));
        let per_step = max1(self.batch_size).saturating_mul(max1(self.grad_accum));
        images.div_ceil(per_step)
    }

    /// Authoritative step count for the whole run.
    #[must_use]
    pub const fn total_steps(&self) -> u64 {
        self.steps_per_epoch().saturating_mul(max1(self.epochs))
    }

    /// Reject configurations no backend can run.
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.name.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("name must not be empty".into()));
        }
        if self.dataset_id.trim().is_empty() {
            return Err(TrainingError::InvalidConfig(
                "dataset_id must not be empty".into(),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(TrainingError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        if !(0.0..1.0).contains(&self.warmup_ratio) {
            return Err(TrainingError::InvalidConfig(format!(
                "warmup_ratio must be in [0, 1), got {}",
                self.warmup_ratio
            )));
        }
        parse_resolution(&self.resolution)?;
        if self.sample_prompt.is_some() {
            parse_resolution(&self.sample_resolution)?;
        }
        Ok(())
    }
}

/// Free-function form of [`TrainingConfig::total_steps`].
#[must_use]
pub const fn total_steps(cfg: &TrainingConfig) -> u64 {
    cfg.total_steps()
}

const fn max1(value: u32) -> u64 {
    if value == 0 { 1 } else { value as u64 }
}

fn parse_resolution(value: &str) -> Result<(u32, u32), TrainingError> {
    let invalid = || TrainingError::InvalidConfig(format!("resolution must be \"W,H\", got {value:?}"));
    let (w, h) = value.split_once(',').ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}
