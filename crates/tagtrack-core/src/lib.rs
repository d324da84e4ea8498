//! Core domain types and port definitions for tagtrack.
//!
//! This crate holds everything the training orchestration core needs that is
//! free of process, filesystem and runtime concerns:
//!
//! - `domain` - training configuration, backends, job identity and state
//! - `events` - task events and the topic-based [`EventBus`]
//! - `ports` - collaborator traits (dataset lookup) and error types
//! - `settings` - runtime settings with validation and env overlay

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    BackendPreset, JobId, JobState, TrainerLaunch, TrainingBackend, TrainingConfig, total_steps,
};
pub use events::{EventBus, ProgressRecord, SubscriptionId, TaskEvent, Topic};
pub use ports::{CoreError, DatasetCatalog, DatasetInfo, TrainingError};
pub use settings::{Settings, SettingsError, validate_settings};
