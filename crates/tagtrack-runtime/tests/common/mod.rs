//! Shared helpers for runtime integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagtrack_core::{EventBus, JobId, JobState, ProgressRecord, TaskEvent, Topic, TrainerLaunch};
use tagtrack_runtime::{RunnerOptions, SimulationCadence, TrainerOutput};

/// Records every event published on the bus, across all topics.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        for topic in Topic::ALL {
            let events = Arc::clone(&recorder.events);
            bus.on(topic, move |event| events.lock().unwrap().push(event.clone()));
        }
        recorder
    }

    pub fn all(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn for_job(&self, id: JobId) -> Vec<TaskEvent> {
        self.all().into_iter().filter(|e| e.job_id() == id).collect()
    }

    pub fn states(&self, id: JobId) -> Vec<JobState> {
        self.for_job(id).iter().filter_map(TaskEvent::state).collect()
    }

    pub fn logs(&self, id: JobId) -> Vec<String> {
        self.for_job(id)
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::TaskLog { line, .. } => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self, id: JobId) -> Vec<ProgressRecord> {
        self.for_job(id)
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::TaskProgress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `pred` in global publish order.
    pub fn position(&self, pred: impl Fn(&TaskEvent) -> bool) -> Option<usize> {
        self.all().iter().position(pred)
    }

    /// Wait until `id` published its terminal state and return that event.
    pub async fn terminal(&self, id: JobId) -> TaskEvent {
        self.wait_until(|r| r.for_job(id).iter().any(TaskEvent::is_terminal))
            .await;
        self.for_job(id)
            .into_iter()
            .find(TaskEvent::is_terminal)
            .unwrap()
    }

    pub async fn wait_until(&self, cond: impl Fn(&Self) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for events");
    }
}

/// [`TrainerOutput`] that keeps everything in memory.
#[derive(Default)]
pub struct CapturedOutput {
    pub logs: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<ProgressRecord>>,
}

impl TrainerOutput for CapturedOutput {
    fn log(&self, line: String) {
        self.logs.lock().unwrap().push(line);
    }

    fn progress(&self, record: ProgressRecord) {
        self.progress.lock().unwrap().push(record);
    }
}

/// Fast simulation pacing for tests.
pub fn fast_cadence() -> SimulationCadence {
    SimulationCadence {
        step_interval: Duration::from_millis(1),
        report_every: 5,
    }
}

/// Runner options launching `script` through `sh -c`.
///
/// Composed training arguments land in the script's positional parameters.
pub fn sh_options(script: &str) -> RunnerOptions {
    RunnerOptions::simulated()
        .with_launch(TrainerLaunch::new("sh").with_leading_args(["-c", script]))
        .with_stop_grace(Duration::from_millis(300))
}
