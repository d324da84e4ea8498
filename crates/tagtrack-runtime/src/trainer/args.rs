//! Declarative mapping from [`TrainingConfig`] fields to trainer flags.
//!
//! Each backend has a table of [`ArgRule`]s applied in order. A rule whose
//! value function returns `None` contributes nothing, which is how optional
//! and not-meaningful settings stay off the command line.

use tagtrack_core::{TrainingBackend, TrainingConfig};

use super::patterns::{MUSUBI_PATTERNS, PatternTable};

/// One `--flag value` pair derived from a configuration.
#[derive(Clone, Copy)]
pub struct ArgRule {
    pub flag: &'static str,
    pub value: fn(&TrainingConfig) -> Option<String>,
}

impl std::fmt::Debug for ArgRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ArgRule").field(&self.flag).finish()
    }
}

// ========== Shared rules ==========

const DATASET_ID: ArgRule = ArgRule {
    flag: "--dataset-id",
    value: |c| Some(c.dataset_id.clone()),
};
const BASE_MODEL: ArgRule = ArgRule {
    flag: "--base-model",
    value: |c| c.base_model.clone(),
};
const DIT: ArgRule = ArgRule {
    flag: "--dit",
    value: |c| c.base_model.clone(),
};
const RESOLUTION: ArgRule = ArgRule {
    flag: "--resolution",
    value: |c| Some(c.resolution.clone()),
};
const REPEATS: ArgRule = ArgRule {
    flag: "--repeats",
    value: |c| Some(c.repeats.to_string()),
};
const EPOCHS: ArgRule = ArgRule {
    flag: "--epochs",
    value: |c| Some(c.epochs.to_string()),
};
const BATCH_SIZE: ArgRule = ArgRule {
    flag: "--batch-size",
    value: |c| Some(c.batch_size.to_string()),
};
const GRAD_ACCUM: ArgRule = ArgRule {
    flag: "--grad-accum",
    value: |c| (c.grad_accum > 1).then(|| c.grad_accum.to_string()),
};
const OPTIMIZER: ArgRule = ArgRule {
    flag: "--optimizer",
    value: |c| Some(c.optimizer.clone()),
};
const LR: ArgRule = ArgRule {
    flag: "--lr",
    value: |c| Some(c.lr.to_string()),
};
const SCHEDULER: ArgRule = ArgRule {
    flag: "--scheduler",
    value: |c| Some(c.scheduler.clone()),
};
const WARMUP_RATIO: ArgRule = ArgRule {
    flag: "--warmup-ratio",
    value: |c| (c.warmup_ratio > 0.0).then(|| c.warmup_ratio.to_string()),
};
const WEIGHT_DECAY: ArgRule = ArgRule {
    flag: "--weight-decay",
    value: |c| (c.weight_decay > 0.0).then(|| c.weight_decay.to_string()),
};
const PRECISION: ArgRule = ArgRule {
    flag: "--precision",
    value: |c| Some(c.precision.clone()),
};
const GPU: ArgRule = ArgRule {
    flag: "--gpu",
    value: |c| Some(c.gpu_index.to_string()),
};

// Sampling only matters once there is a prompt to sample with.
const SAMPLE_PROMPT: ArgRule = ArgRule {
    flag: "--sample-prompt",
    value: |c| c.sample_prompt.clone(),
};
const SAMPLE_EVERY: ArgRule = ArgRule {
    flag: "--sample-every-n-steps",
    value: |c| {
        c.sample_prompt
            .as_ref()
            .and(c.sample_every_n_steps)
            .filter(|n| *n > 0)
            .map(|n| n.to_string())
    },
};
const SAMPLE_RESOLUTION: ArgRule = ArgRule {
    flag: "--sample-resolution",
    value: |c| c.sample_prompt.as_ref().map(|_| c.sample_resolution.clone()),
};
const SAMPLE_NUM_IMAGES: ArgRule = ArgRule {
    flag: "--sample-num-images",
    value: |c| c.sample_prompt.as_ref().map(|_| c.sample_num_images.to_string()),
};

// ========== Backend tables ==========

const QWEN_IMAGE_ARGS: &[ArgRule] = &[
    DATASET_ID,
    BASE_MODEL,
    RESOLUTION,
    REPEATS,
    EPOCHS,
    BATCH_SIZE,
    GRAD_ACCUM,
    OPTIMIZER,
    LR,
    SCHEDULER,
    WARMUP_RATIO,
    WEIGHT_DECAY,
    PRECISION,
    GPU,
    SAMPLE_PROMPT,
    SAMPLE_EVERY,
    SAMPLE_RESOLUTION,
    SAMPLE_NUM_IMAGES,
];

const HUNYUAN_VIDEO_ARGS: &[ArgRule] = &[
    DATASET_ID,
    DIT,
    RESOLUTION,
    REPEATS,
    EPOCHS,
    BATCH_SIZE,
    GRAD_ACCUM,
    OPTIMIZER,
    LR,
    SCHEDULER,
    WARMUP_RATIO,
    WEIGHT_DECAY,
    PRECISION,
    GPU,
    SAMPLE_PROMPT,
    SAMPLE_EVERY,
    SAMPLE_RESOLUTION,
    SAMPLE_NUM_IMAGES,
];

/// Everything backend-specific about driving a trainer.
#[derive(Debug, Clone, Copy)]
pub struct BackendProfile {
    pub backend: TrainingBackend,
    pub label: &'static str,
    pub args: &'static [ArgRule],
    pub patterns: &'static PatternTable,
}

impl BackendProfile {
    pub fn for_backend(backend: TrainingBackend) -> Self {
        match backend {
            TrainingBackend::MusubiQwenImage => Self {
                backend,
                label: "Musubi Qwen Image",
                args: QWEN_IMAGE_ARGS,
                patterns: &MUSUBI_PATTERNS,
            },
            TrainingBackend::MusubiHunyuanVideo => Self {
                backend,
                label: "Musubi HunyuanVideo",
                args: HUNYUAN_VIDEO_ARGS,
                patterns: &MUSUBI_PATTERNS,
            },
        }
    }

    /// Training arguments for `cfg`, without program or leading args.
    pub fn compose_args(&self, cfg: &TrainingConfig) -> Vec<String> {
        compose(cfg, self.args)
    }
}

pub fn compose(cfg: &TrainingConfig, rules: &[ArgRule]) -> Vec<String> {
    let mut args = Vec::with_capacity(rules.len() * 2);
    for rule in rules {
        if let Some(value) = (rule.value)(cfg) {
            args.push(rule.flag.to_string());
            args.push(value);
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .map(|pos| args[pos + 1].as_str())
    }

    fn qwen() -> TrainingConfig {
        TrainingConfig::new(TrainingBackend::MusubiQwenImage, "lora", "cats", 40)
    }

    #[test]
    fn test_required_flags_present() {
        let args = BackendProfile::for_backend(TrainingBackend::MusubiQwenImage)
            .compose_args(&qwen().with_epochs(3).with_gpu_index(1));

        assert_eq!(value_of(&args, "--dataset-id"), Some("cats"));
        assert_eq!(value_of(&args, "--epochs"), Some("3"));
        assert_eq!(value_of(&args, "--batch-size"), Some("2"));
        assert_eq!(value_of(&args, "--optimizer"), Some("adamw8bit"));
        assert_eq!(value_of(&args, "--lr"), Some("0.0001"));
        assert_eq!(value_of(&args, "--precision"), Some("bf16"));
        assert_eq!(value_of(&args, "--gpu"), Some("1"));
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let args = compose(&qwen(), QWEN_IMAGE_ARGS);
        for flag in [
            "--base-model",
            "--grad-accum",
            "--warmup-ratio",
            "--weight-decay",
            "--sample-prompt",
            "--sample-every-n-steps",
            "--sample-resolution",
            "--sample-num-images",
        ] {
            assert!(!args.iter().any(|a| a == flag), "{flag} should be omitted");
        }
    }

    #[test]
    fn test_sampling_flags_follow_prompt() {
        let args = compose(&qwen().with_sample_prompt("a cat"), QWEN_IMAGE_ARGS);
        assert_eq!(value_of(&args, "--sample-prompt"), Some("a cat"));
        assert_eq!(value_of(&args, "--sample-every-n-steps"), Some("200"));
        assert_eq!(value_of(&args, "--sample-resolution"), Some("1024,1024"));
        assert_eq!(value_of(&args, "--sample-num-images"), Some("2"));
    }

    #[test]
    fn test_video_uses_dit_flag() {
        let cfg = TrainingConfig::new(TrainingBackend::MusubiHunyuanVideo, "v", "clips", 8)
            .with_base_model("/models/hv.safetensors");
        let args = BackendProfile::for_backend(cfg.backend).compose_args(&cfg);

        assert_eq!(value_of(&args, "--dit"), Some("/models/hv.safetensors"));
        assert!(!args.iter().any(|a| a == "--base-model"));
        assert_eq!(value_of(&args, "--grad-accum"), Some("4"));
    }
}
