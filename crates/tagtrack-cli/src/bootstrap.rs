//! CLI bootstrap, the composition root.
//!
//! Settings come from the environment (after `.env` is loaded) with command
//! line overrides on top. The resulting [`CliContext`] owns the training
//! manager every handler works through.

use std::path::PathBuf;

use tracing::debug;

use tagtrack_core::{
    DatasetCatalog, JobId, Settings, TrainingBackend, TrainingConfig, validate_settings,
};
use tagtrack_runtime::{DirectoryDatasetCatalog, TrainingManager};

use crate::commands::RunArgs;
use crate::error::CliError;

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub settings: Settings,
    /// Root of the dataset directories; `None` requires explicit sizes.
    pub datasets_dir: Option<PathBuf>,
}

impl CliConfig {
    /// Settings from the process environment.
    pub fn from_env() -> Result<Self, CliError> {
        Ok(Self {
            settings: Settings::from_env()?,
            datasets_dir: None,
        })
    }

    #[must_use]
    pub fn with_datasets_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.datasets_dir = dir;
        self
    }

    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        if max_workers.is_some() {
            self.settings.max_workers = max_workers;
        }
        self
    }

    /// Point `backend` at `script`, so it runs for real.
    #[must_use]
    pub fn with_trainer_script(mut self, backend: TrainingBackend, script: String) -> Self {
        match backend {
            TrainingBackend::MusubiQwenImage => self.settings.qwen_image_script = Some(script),
            TrainingBackend::MusubiHunyuanVideo => {
                self.settings.hunyuan_video_script = Some(script);
            }
        }
        self
    }

    /// Drop every configured trainer script so all runs are simulated.
    #[must_use]
    pub fn simulated(mut self) -> Self {
        self.settings.qwen_image_script = None;
        self.settings.hunyuan_video_script = None;
        self
    }
}

/// Fully composed context handed to command handlers.
pub struct CliContext {
    pub manager: TrainingManager,
    pub catalog: Option<DirectoryDatasetCatalog>,
}

impl CliContext {
    /// Where the dataset size of `args` comes from: `None` when it was given
    /// explicitly, otherwise the catalog that counts it.
    fn size_source(&self, args: &RunArgs) -> Result<Option<&DirectoryDatasetCatalog>, CliError> {
        if args.dataset_size.is_some() {
            return Ok(None);
        }
        self.catalog.as_ref().map(Some).ok_or_else(|| {
            CliError::Arguments("either --dataset-size or --datasets-dir is required".into())
        })
    }

    /// Configuration for `args`, with the dataset size filled in from the
    /// catalog when it was not given explicitly.
    pub fn resolve_config(&self, args: &RunArgs) -> Result<TrainingConfig, CliError> {
        let cfg = args.to_config();
        match self.size_source(args)? {
            Some(catalog) => {
                let info = catalog.dataset(&args.dataset)?;
                Ok(cfg.with_dataset_size(info.image_count))
            }
            None => Ok(cfg),
        }
    }

    /// Submit the run described by `args`.
    ///
    /// Without an explicit size the dataset is counted at submission.
    pub fn submit(&self, args: &RunArgs) -> Result<JobId, CliError> {
        let cfg = args.to_config();
        let id = match self.size_source(args)? {
            Some(catalog) => self.manager.run_training_for_dataset(catalog, cfg)?,
            None => self.manager.run_training(cfg)?,
        };
        Ok(id)
    }
}

/// Validate `config` and compose the CLI context.
pub fn bootstrap(config: CliConfig) -> Result<CliContext, CliError> {
    validate_settings(&config.settings)?;
    debug!(target: "tagtrack.settings", settings = ?config.settings, "Effective settings");

    Ok(CliContext {
        manager: TrainingManager::with_settings(&config.settings),
        catalog: config.datasets_dir.map(DirectoryDatasetCatalog::new),
    })
}
