//! Training backends and their default presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ports::TrainingError;

/// External trainer program a [`TrainingConfig`](super::TrainingConfig) targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrainingBackend {
    /// Musubi-Tuner LoRA training for Qwen-Image.
    #[serde(rename = "musubi.qwen_image")]
    MusubiQwenImage,
    /// Musubi-Tuner LoRA training for HunyuanVideo.
    #[serde(rename = "musubi.hunyuan_video")]
    MusubiHunyuanVideo,
}

impl TrainingBackend {
    /// Every known backend, in display order.
    pub const ALL: [Self; 2] = [Self::MusubiQwenImage, Self::MusubiHunyuanVideo];

    /// Stable identifier used on the wire and in settings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MusubiQwenImage => "musubi.qwen_image",
            Self::MusubiHunyuanVideo => "musubi.hunyuan_video",
        }
    }

    /// Defaults applied when a configuration is created for this backend.
    #[must_use]
    pub const fn preset(&self) -> BackendPreset {
        match self {
            Self::MusubiQwenImage => BackendPreset {
                optimizer: "adamw8bit",
                lr: 1e-4,
                scheduler: "cosine",
                warmup_ratio: 0.0,
                weight_decay: 0.0,
                precision: "bf16",
                batch_size: 2,
                grad_accum: 1,
                resolution: "1024,1024",
                sample_every_n_steps: 200,
                sample_resolution: "1024,1024",
                sample_num_images: 2,
            },
            // Video batches are small; accumulation compensates.
            Self::MusubiHunyuanVideo => BackendPreset {
                optimizer: "adamw8bit",
                lr: 1e-4,
                scheduler: "cosine",
                warmup_ratio: 0.0,
                weight_decay: 0.0,
                precision: "bf16",
                batch_size: 1,
                grad_accum: 4,
                resolution: "720,1280",
                sample_every_n_steps: 100,
                sample_resolution: "1024,1024",
                sample_num_images: 1,
            },
        }
    }
}

impl fmt::Display for TrainingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingBackend {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str() == s.trim())
            .ok_or_else(|| TrainingError::UnknownBackend(s.to_string()))
    }
}

/// Per-backend defaults for the tunable parts of a training configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendPreset {
    pub optimizer: &'static str,
    pub lr: f64,
    pub scheduler: &'static str,
    pub warmup_ratio: f64,
    pub weight_decay: f64,
    pub precision: &'static str,
    pub batch_size: u32,
    pub grad_accum: u32,
    pub resolution: &'static str,
    pub sample_every_n_steps: u32,
    pub sample_resolution: &'static str,
    pub sample_num_images: u32,
}
