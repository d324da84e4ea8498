//! CLI error type and exit-code mapping.

use thiserror::Error;

use tagtrack_core::{CoreError, SettingsError, TrainingError};

/// Exit code used when a run was canceled, as for a shell interrupt.
pub const CANCELED_EXIT_CODE: i32 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(String),

    /// The run reached `FAILED`.
    #[error("Training {name:?} failed{}", detail(.code, .error))]
    TrainingFailed {
        name: String,
        code: Option<i32>,
        error: Option<String>,
    },

    #[error("Training {0:?} was canceled")]
    Canceled(String),
}

fn detail(code: &Option<i32>, error: &Option<String>) -> String {
    match (code, error) {
        (_, Some(error)) => format!(": {error}"),
        (Some(code), None) => format!(" with exit code {code}"),
        (None, None) => String::new(),
    }
}

impl CliError {
    /// Exit code for the process, following sysexits.h where one fits.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Arguments(_) => 2,
            Self::Config(_) => 78, // EX_CONFIG
            Self::Dataset(_) => 65, // EX_DATAERR
            Self::Io(_) => 74,      // EX_IOERR
            Self::TrainingFailed { .. } => 1,
            Self::Canceled(_) => CANCELED_EXIT_CODE,
        }
    }
}

impl From<TrainingError> for CliError {
    fn from(err: TrainingError) -> Self {
        match err {
            TrainingError::UnknownBackend(_) | TrainingError::InvalidConfig(_) => {
                Self::Arguments(err.to_string())
            }
            TrainingError::Dataset(core) => core.into(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DatasetNotFound(_) | CoreError::Validation(_) => {
                Self::Dataset(err.to_string())
            }
            CoreError::Io(e) => Self::Io(e.to_string()),
            CoreError::Settings(e) => e.into(),
        }
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
