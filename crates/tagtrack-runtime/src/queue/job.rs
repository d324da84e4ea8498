//! Schedulable units of work and the sinks they report through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tagtrack_core::{JobId, ProgressRecord, TaskEvent};

/// Work executed by the queue.
///
/// `run` is called at most once. It returns a completion code (0 for
/// success) or an error; both panics and errors are contained by the queue
/// and reported as `FAILED`.
#[async_trait]
pub trait JobWork: Send + Sync {
    async fn run(&self, sinks: JobSinks) -> anyhow::Result<i32>;

    /// Request cooperative termination. Must not block.
    fn cancel(&self);
}

/// A named job ready for submission.
#[derive(Clone)]
pub struct Job {
    pub name: String,
    pub work: Arc<dyn JobWork>,
}

impl Job {
    pub fn new(name: impl Into<String>, work: Arc<dyn JobWork>) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Output sinks handed to a running job.
///
/// Both sinks feed the job's single ordered event channel, so log lines and
/// progress records reach subscribers in the order the job produced them.
/// Sending after the job reached a terminal state is a silent no-op.
#[derive(Clone, Debug)]
pub struct JobSinks {
    id: JobId,
    events: mpsc::UnboundedSender<TaskEvent>,
}

impl JobSinks {
    pub(crate) const fn new(id: JobId, events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { id, events }
    }

    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Publish one output line on `task_log`.
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.events.send(TaskEvent::log(self.id, line));
    }

    /// Publish a progress record on `task_progress`.
    pub fn progress(&self, record: ProgressRecord) {
        let _ = self.events.send(TaskEvent::progress(self.id, record));
    }
}
