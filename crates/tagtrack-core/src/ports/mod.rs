//! Port definitions (trait abstractions) and the error types that cross them.
//!
//! Ports are the seams between the orchestration core and its collaborators.
//! Implementations live in the runtime crate or in callers.

mod dataset;

use thiserror::Error;

pub use dataset::{DatasetCatalog, DatasetInfo};

/// Errors from core collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No dataset with the given identifier exists.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// Validation error (invalid input).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings validation error.
    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),
}

/// Errors returned synchronously when a training run is submitted.
///
/// Failures of the run itself are never returned here; they surface as a
/// `FAILED` task state.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// No runner is registered for the requested backend.
    #[error("Unknown training backend: {0}")]
    UnknownBackend(String),

    /// The configuration cannot be run.
    #[error("Invalid training config: {0}")]
    InvalidConfig(String),

    /// Resolving the dataset failed.
    #[error(transparent)]
    Dataset(#[from] CoreError),
}
