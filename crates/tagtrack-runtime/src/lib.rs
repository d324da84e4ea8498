//! Runtime for tagtrack training orchestration.
//!
//! This crate provides the parts that need an async runtime or the OS:
//!
//! - `queue` - bounded-concurrency [`JobQueue`] publishing task events
//! - `process` - trainer process spawning, output streaming and shutdown
//! - `trainer` - per-backend [`ProcessRunner`]s (command lines, progress
//!   parsing, simulation)
//! - `manager` - [`TrainingManager`], the submission facade
//! - `dataset` - filesystem [`DirectoryDatasetCatalog`]
//! - `logfile` - per-job realtime [`JobLogFiles`]

pub mod dataset;
pub mod logfile;
pub mod manager;
pub mod process;
pub mod queue;
pub mod trainer;

pub use dataset::DirectoryDatasetCatalog;
pub use logfile::JobLogFiles;
pub use manager::{SpeedCache, TrainingManager};
pub use process::{CommandSpec, ProcessError, TrainerProcess};
pub use queue::{Job, JobQueue, JobSinks, JobSnapshot, JobWork};
pub use trainer::{
    ProcessRunner, RunnerOptions, SimulationCadence, TrainerError, TrainerOutput, TrainingRun,
};
