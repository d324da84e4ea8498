//! Task events and the topic-based event bus.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag equal to their topic name:
//!
//! ```json
//! { "type": "task_state", "id": "4f0c...", "state": "FAILED", "code": 1 }
//! { "type": "task_progress", "id": "4f0c...", "step": 20, "total_steps": 100, "eta_secs": 80 }
//! ```

mod bus;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobState};

pub use bus::{EventBus, SubscriptionId};

/// Channel an event is published on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    TaskState,
    TaskLog,
    TaskProgress,
}

impl Topic {
    pub const ALL: [Self; 3] = [Self::TaskState, Self::TaskLog, Self::TaskProgress];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TaskState => "task_state",
            Self::TaskLog => "task_log",
            Self::TaskProgress => "task_progress",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one training run at a given step.
///
/// Only `step` is guaranteed; everything else is filled in when the trainer
/// reported it or when it could be derived locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub step: u64,
    /// Authoritative total, overwritten by the manager before publishing.
    pub total_steps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_epochs: Option<u32>,
    /// Iterations per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    /// Learning rate, as printed by the trainer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
}

impl ProgressRecord {
    #[must_use]
    pub fn at_step(step: u64, total_steps: u64) -> Self {
        Self {
            step,
            total_steps,
            ..Self::default()
        }
    }

    /// Completed fraction in `[0, 1]`, or `None` when the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total_steps > 0)
            .then(|| (self.step as f64 / self.total_steps as f64).clamp(0.0, 1.0))
    }
}

/// Every event the job orchestration core publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A job changed lifecycle state.
    TaskState {
        id: JobId,
        state: JobState,
        /// Display name, carried on the `QUEUED` event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Exit code, carried on `FAILED` when the job returned nonzero.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        /// Error message, carried on `FAILED` when the job errored or panicked.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One line of job output, verbatim.
    TaskLog { id: JobId, line: String },

    /// A parsed (and possibly enriched) progress record.
    TaskProgress {
        id: JobId,
        #[serde(flatten)]
        progress: ProgressRecord,
    },
}

impl TaskEvent {
    fn state_change(id: JobId, state: JobState) -> Self {
        Self::TaskState {
            id,
            state,
            name: None,
            code: None,
            error: None,
        }
    }

    pub fn queued(id: JobId, name: impl Into<String>) -> Self {
        Self::TaskState {
            id,
            state: JobState::Queued,
            name: Some(name.into()),
            code: None,
            error: None,
        }
    }

    pub fn running(id: JobId) -> Self {
        Self::state_change(id, JobState::Running)
    }

    pub fn completed(id: JobId) -> Self {
        Self::state_change(id, JobState::Completed)
    }

    /// Failure by nonzero completion code.
    pub fn failed_code(id: JobId, code: i32) -> Self {
        Self::TaskState {
            id,
            state: JobState::Failed,
            name: None,
            code: Some(code),
            error: None,
        }
    }

    /// Failure by error or panic inside the job.
    pub fn failed_error(id: JobId, error: impl Into<String>) -> Self {
        Self::TaskState {
            id,
            state: JobState::Failed,
            name: None,
            code: None,
            error: Some(error.into()),
        }
    }

    pub fn canceled(id: JobId) -> Self {
        Self::state_change(id, JobState::Canceled)
    }

    pub fn log(id: JobId, line: impl Into<String>) -> Self {
        Self::TaskLog {
            id,
            line: line.into(),
        }
    }

    pub const fn progress(id: JobId, progress: ProgressRecord) -> Self {
        Self::TaskProgress { id, progress }
    }

    /// Topic this event is delivered on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::TaskState { .. } => Topic::TaskState,
            Self::TaskLog { .. } => Topic::TaskLog,
            Self::TaskProgress { .. } => Topic::TaskProgress,
        }
    }

    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::TaskState { id, .. } | Self::TaskLog { id, .. } | Self::TaskProgress { id, .. } => {
                *id
            }
        }
    }

    /// Lifecycle state, for `task_state` events.
    #[must_use]
    pub const fn state(&self) -> Option<JobState> {
        match self {
            Self::TaskState { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Whether this event closes the job's event stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self.state() {
            Some(state) => state.is_terminal(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_follows_variant() {
        let id = JobId::new();
        assert_eq!(TaskEvent::queued(id, "a").topic(), Topic::TaskState);
        assert_eq!(TaskEvent::log(id, "x").topic(), Topic::TaskLog);
        assert_eq!(
            TaskEvent::progress(id, ProgressRecord::at_step(1, 2)).topic(),
            Topic::TaskProgress
        );
    }

    #[test]
    fn test_type_tag_matches_topic_name() {
        let id = JobId::new();
        for event in [
            TaskEvent::running(id),
            TaskEvent::log(id, "line"),
            TaskEvent::progress(id, ProgressRecord::at_step(3, 9)),
        ] {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.topic().as_str());
        }
    }

    #[test]
    fn test_progress_is_flattened() {
        let id = JobId::new();
        let mut record = ProgressRecord::at_step(20, 100);
        record.eta_secs = Some(80);
        let value = serde_json::to_value(TaskEvent::progress(id, record)).unwrap();
        assert_eq!(value["step"], 20);
        assert_eq!(value["total_steps"], 100);
        assert_eq!(value["eta_secs"], 80);
        assert!(value.get("ips").is_none());
    }

    #[test]
    fn test_failed_carries_code_or_error() {
        let id = JobId::new();
        let value = serde_json::to_value(TaskEvent::failed_code(id, 2)).unwrap();
        assert_eq!(value["state"], "FAILED");
        assert_eq!(value["code"], 2);
        assert!(value.get("error").is_none());

        let event = TaskEvent::failed_error(id, "boom");
        assert!(event.is_terminal());
        assert_eq!(event.state(), Some(JobState::Failed));
    }

    #[test]
    fn test_fraction_clamps() {
        assert_eq!(ProgressRecord::at_step(5, 0).fraction(), None);
        assert_eq!(ProgressRecord::at_step(150, 100).fraction(), Some(1.0));
    }
}
