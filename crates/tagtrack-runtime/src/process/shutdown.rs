//! Stop signals for trainer process groups.
//!
//! Trainers are started in their own process group so that the data-loader
//! workers they fork receive the same signal as the trainer itself.

use std::io;

use tokio::process::Child;

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// Ask the child (and its process group) to stop.
///
/// - Unix: SIGTERM to the group
/// - Other platforms: immediate termination, there is no graceful equivalent
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(child, Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Kill the child (and its process group) without grace.
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(child, Signal::SIGKILL)?;
    }

    match child.start_kill() {
        // Already reaped.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) -> io::Result<()> {
    // No pid means the child has already been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pgid = i32::try_from(pid).map_err(io::Error::other)?;

    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}
