//! Per-job realtime log files.
//!
//! Every `task_log` line of a job is appended to
//! `<root>/<job id>/logs/training_realtime.log` as it is published, so the
//! trainer output survives the process that followed it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use tagtrack_core::{EventBus, JobId, SubscriptionId, TaskEvent, Topic};

/// File name of a job's log under its `logs/` directory.
pub const LOG_FILE_NAME: &str = "training_realtime.log";

#[derive(Debug, Clone)]
pub struct JobLogFiles {
    root: PathBuf,
}

impl JobLogFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Log file of job `id`. It only exists once a line was written.
    pub fn path_for(&self, id: JobId) -> PathBuf {
        self.root
            .join(id.to_string())
            .join("logs")
            .join(LOG_FILE_NAME)
    }

    /// Append `line` to the log of job `id`, creating directories as needed.
    pub fn append(&self, id: JobId, line: &str) -> io::Result<()> {
        let path = self.path_for(id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        file.flush()
    }

    /// Write every `task_log` line published on `bus`.
    ///
    /// Write failures are logged and never reach the publisher.
    pub fn attach(self, bus: &EventBus) -> SubscriptionId {
        bus.on(Topic::TaskLog, move |event| {
            if let TaskEvent::TaskLog { id, line } = event {
                if let Err(e) = self.append(*id, line) {
                    warn!(target: "tagtrack.manager", job_id = %id, error = %e, "Failed to write job log file");
                }
            }
        })
    }
}
