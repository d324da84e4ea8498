//! Settings domain types and validation.
//!
//! Every field is optional so partial settings (from a file, the environment
//! or CLI flags) can be layered; the `effective_*` accessors apply defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{TrainerLaunch, TrainingBackend};

/// Default number of concurrently running jobs.
pub const DEFAULT_MAX_WORKERS: usize = 1;

/// Environment variable that pins the accelerator for a trainer process.
pub const DEFAULT_DEVICE_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Seconds a trainer gets to exit after a graceful stop request.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 10;

pub const DEFAULT_SIM_STEP_INTERVAL_MS: u64 = 50;
pub const DEFAULT_SIM_REPORT_EVERY: u64 = 10;
pub const DEFAULT_PYTHON: &str = "python3";

const MAX_WORKERS_LIMIT: usize = 16;
const MAX_STOP_GRACE_SECS: u64 = 600;
const MAX_SIM_STEP_INTERVAL_MS: u64 = 60_000;

/// Runtime settings for the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Jobs allowed to run at once (1-16).
    pub max_workers: Option<usize>,

    /// Environment variable set to the configured GPU index.
    pub device_env_var: Option<String>,

    /// Grace period between the stop request and the forced kill.
    pub stop_grace_secs: Option<u64>,

    /// Delay between simulated steps when no trainer is configured.
    pub sim_step_interval_ms: Option<u64>,

    /// Simulated progress is reported every this many steps.
    pub sim_report_every: Option<u64>,

    /// Interpreter used to launch trainer scripts.
    pub python_path: Option<String>,

    /// Training script for `musubi.qwen_image`. Unset means simulation.
    pub qwen_image_script: Option<String>,

    /// Training script for `musubi.hunyuan_video`. Unset means simulation.
    pub hunyuan_video_script: Option<String>,

    /// Root for per-job realtime log files. Unset disables them.
    pub log_dir: Option<String>,
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            max_workers: Some(DEFAULT_MAX_WORKERS),
            device_env_var: None,
            stop_grace_secs: Some(DEFAULT_STOP_GRACE_SECS),
            sim_step_interval_ms: Some(DEFAULT_SIM_STEP_INTERVAL_MS),
            sim_report_every: Some(DEFAULT_SIM_REPORT_EVERY),
            python_path: None,
            qwen_image_script: None,
            hunyuan_video_script: None,
            log_dir: None,
        }
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::with_defaults();
        settings.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Overlay values from `lookup`, which maps variable names to values.
    ///
    /// Recognized variables: `TAGTRACK_MAX_WORKERS`, `TAGTRACK_STOP_GRACE_SECS`,
    /// `TAGTRACK_DEVICE_ENV_VAR`, `TAGTRACK_PYTHON`, `TAGTRACK_LOG_DIR`,
    /// `MUSUBI_QWEN_TRAIN` and `MUSUBI_HUNYUAN_TRAIN`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .inspect(|value| {
                    tracing::debug!(target: "tagtrack.settings", var = key, value = %value, "Setting from environment");
                })
        };

        if let Some(value) = get("TAGTRACK_MAX_WORKERS") {
            self.max_workers = Some(parse_env("TAGTRACK_MAX_WORKERS", &value)?);
        }
        if let Some(value) = get("TAGTRACK_STOP_GRACE_SECS") {
            self.stop_grace_secs = Some(parse_env("TAGTRACK_STOP_GRACE_SECS", &value)?);
        }
        if let Some(value) = get("TAGTRACK_DEVICE_ENV_VAR") {
            self.device_env_var = Some(value);
        }
        if let Some(value) = get("TAGTRACK_PYTHON") {
            self.python_path = Some(value);
        }
        if let Some(value) = get("TAGTRACK_LOG_DIR") {
            self.log_dir = Some(value);
        }
        if let Some(value) = get("MUSUBI_QWEN_TRAIN") {
            self.qwen_image_script = Some(value);
        }
        if let Some(value) = get("MUSUBI_HUNYUAN_TRAIN") {
            self.hunyuan_video_script = Some(value);
        }
        Ok(())
    }

    #[must_use]
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1)
    }

    #[must_use]
    pub fn effective_device_env_var(&self) -> &str {
        self.device_env_var.as_deref().unwrap_or(DEFAULT_DEVICE_ENV_VAR)
    }

    #[must_use]
    pub fn effective_stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs.unwrap_or(DEFAULT_STOP_GRACE_SECS))
    }

    #[must_use]
    pub fn effective_sim_step_interval(&self) -> Duration {
        Duration::from_millis(
            self.sim_step_interval_ms
                .unwrap_or(DEFAULT_SIM_STEP_INTERVAL_MS),
        )
    }

    #[must_use]
    pub fn effective_sim_report_every(&self) -> u64 {
        self.sim_report_every.unwrap_or(DEFAULT_SIM_REPORT_EVERY).max(1)
    }

    #[must_use]
    pub fn effective_python(&self) -> &str {
        self.python_path.as_deref().unwrap_or(DEFAULT_PYTHON)
    }

    /// Training script configured for `backend`, if any.
    #[must_use]
    pub fn trainer_script(&self, backend: TrainingBackend) -> Option<&str> {
        match backend {
            TrainingBackend::MusubiQwenImage => self.qwen_image_script.as_deref(),
            TrainingBackend::MusubiHunyuanVideo => self.hunyuan_video_script.as_deref(),
        }
    }

    /// How to launch `backend`'s trainer, or `None` to simulate.
    ///
    /// Scripts run unbuffered so progress lines arrive as they are printed.
    #[must_use]
    pub fn trainer_launch(&self, backend: TrainingBackend) -> Option<TrainerLaunch> {
        self.trainer_script(backend).map(|script| {
            TrainerLaunch::new(self.effective_python()).with_leading_args(["-u", script])
        })
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Max workers must be between 1 and {MAX_WORKERS_LIMIT}, got {0}")]
    InvalidMaxWorkers(usize),

    #[error("Stop grace period must be between 1 and {MAX_STOP_GRACE_SECS} seconds, got {0}")]
    InvalidStopGrace(u64),

    #[error("Simulation step interval must be at most {MAX_SIM_STEP_INTERVAL_MS} ms, got {0}")]
    InvalidSimInterval(u64),

    #[error("Simulation report interval must be at least 1 step")]
    InvalidSimReportEvery,

    #[error("{0} cannot be empty")]
    EmptyValue(&'static str),

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if let Some(workers) = settings.max_workers {
        if !(1..=MAX_WORKERS_LIMIT).contains(&workers) {
            return Err(SettingsError::InvalidMaxWorkers(workers));
        }
    }

    if let Some(grace) = settings.stop_grace_secs {
        if !(1..=MAX_STOP_GRACE_SECS).contains(&grace) {
            return Err(SettingsError::InvalidStopGrace(grace));
        }
    }

    if let Some(interval) = settings.sim_step_interval_ms {
        if interval > MAX_SIM_STEP_INTERVAL_MS {
            return Err(SettingsError::InvalidSimInterval(interval));
        }
    }

    if settings.sim_report_every == Some(0) {
        return Err(SettingsError::InvalidSimReportEvery);
    }

    let non_empty = [
        ("device_env_var", &settings.device_env_var),
        ("python_path", &settings.python_path),
        ("qwen_image_script", &settings.qwen_image_script),
        ("hunyuan_video_script", &settings.hunyuan_video_script),
        ("log_dir", &settings.log_dir),
    ];
    for (name, value) in non_empty {
        if value.as_ref().is_some_and(|v| v.trim().is_empty()) {
            return Err(SettingsError::EmptyValue(name));
        }
    }

    Ok(())
}
