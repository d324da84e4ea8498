//! External trainer processes.
//!
//! - `command` - program, arguments and environment of one launch
//! - `child` - spawning, output streaming and exit handling
//! - `shutdown` - graceful stop and forced kill, per platform
//! - `stream` - lossy line reader for child output

mod child;
mod command;
mod shutdown;
mod stream;

use thiserror::Error;

pub use child::TrainerProcess;
pub use command::CommandSpec;
pub use stream::spawn_line_reader;

/// Errors from process operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process has no {0} handle")]
    MissingStream(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
