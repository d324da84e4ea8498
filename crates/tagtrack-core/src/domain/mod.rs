//! Pure domain types for training orchestration.
//!
//! Nothing in here touches processes, the filesystem or a runtime.

mod backend;
mod config;
mod job;
mod launch;

pub use backend::{BackendPreset, TrainingBackend};
pub use config::{TrainingConfig, total_steps};
pub use job::{JobId, JobState};
pub use launch::TrainerLaunch;
