//! Terminal output for training runs.
//!
//! Format-only: nothing in here talks to the manager.

pub mod progress;

pub use progress::{TrainingProgressPrinter, describe_progress, format_eta};
