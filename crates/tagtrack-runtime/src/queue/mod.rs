//! Bounded-concurrency job queue.
//!
//! Jobs are dispatched onto tokio tasks gated by a semaphore of
//! `max_workers` permits. Each job gets one ordered event channel; a
//! dedicated fan-out task drains it into the [`EventBus`], so a job's events
//! reach subscribers in the order they were produced:
//!
//! `QUEUED`, `RUNNING`, logs and progress, then exactly one terminal state.
//!
//! `QUEUED` is published synchronously from [`JobQueue::submit`]; everything
//! after it goes through the channel.
//!
//! A job is *settled* once its worker has returned and released its permit.
//! Cancellation publishes `CANCELED` right away, while the work may still be
//! shutting down; [`JobQueue::wait`] blocks until it has settled.

mod job;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tagtrack_core::{EventBus, JobId, JobState, TaskEvent};

pub use job::{Job, JobSinks, JobWork};

/// Point-in-time view of one registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
}

struct JobEntry {
    name: String,
    state: JobState,
    work: Arc<dyn JobWork>,
    /// Dropped once the terminal event has been sent.
    events: Option<mpsc::UnboundedSender<TaskEvent>>,
    cancel: CancellationToken,
    /// Flips to `true` once the worker released its permit.
    settled: watch::Receiver<bool>,
}

impl JobEntry {
    /// Move to a terminal state and close the channel behind `event`.
    fn finish(&mut self, state: JobState, event: TaskEvent) {
        self.state = state;
        if let Some(tx) = self.events.take() {
            let _ = tx.send(event);
        }
    }
}

struct QueueInner {
    bus: Arc<EventBus>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    jobs: Mutex<IndexMap<JobId, JobEntry>>,
}

impl QueueInner {
    fn jobs(&self) -> std::sync::MutexGuard<'_, IndexMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size worker pool for [`Job`]s.
///
/// Cloning is cheap; clones share the same pool and registry.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create a queue publishing on `bus`. A `max_workers` of 0 is treated as 1.
    pub fn new(bus: Arc<EventBus>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(QueueInner {
                bus,
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                jobs: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Register `job`, publish `QUEUED` and schedule it.
    ///
    /// Returns immediately; the job waits for a free worker in the
    /// background. Must be called from within a tokio runtime.
    pub fn submit(&self, job: Job) -> JobId {
        let id = JobId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (settle_tx, settled) = watch::channel(false);

        self.inner.jobs().insert(
            id,
            JobEntry {
                name: job.name.clone(),
                state: JobState::Queued,
                work: Arc::clone(&job.work),
                events: Some(tx.clone()),
                cancel: cancel.clone(),
                settled,
            },
        );
        debug!(target: "tagtrack.queue", job_id = %id, name = %job.name, "Job queued");

        let failed = self.inner.bus.emit(&TaskEvent::queued(id, job.name));
        log_handler_failures(id, "task_state", failed);

        let fan_out = tokio::spawn(fan_out(Arc::clone(&self.inner.bus), id, rx));
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            dispatch(inner, id, job.work, tx, cancel, fan_out).await;
            let _ = settle_tx.send(true);
        });
        id
    }

    /// Cancel a queued or running job.
    ///
    /// Returns `false` (and publishes nothing) for unknown ids and jobs that
    /// already reached a terminal state.
    pub fn cancel(&self, id: JobId) -> bool {
        let work = {
            let mut jobs = self.inner.jobs();
            let Some(entry) = jobs.get_mut(&id) else {
                debug!(target: "tagtrack.queue", job_id = %id, "Cancel for unknown job ignored");
                return false;
            };
            if entry.state.is_terminal() {
                return false;
            }
            entry.finish(JobState::Canceled, TaskEvent::canceled(id));
            entry.cancel.cancel();
            Arc::clone(&entry.work)
        };

        debug!(target: "tagtrack.queue", job_id = %id, "Job canceled");
        if catch_unwind(AssertUnwindSafe(|| work.cancel())).is_err() {
            warn!(target: "tagtrack.queue", job_id = %id, "Job cancel hook panicked");
        }
        true
    }

    /// Wait until `id` has settled: its work returned and its worker slot is
    /// free again. For a canceled trainer this means the process is gone.
    ///
    /// Returns immediately for unknown ids and jobs that already settled.
    pub async fn wait(&self, id: JobId) {
        let settled = self.inner.jobs().get(&id).map(|entry| entry.settled.clone());
        let Some(mut settled) = settled else {
            return;
        };
        // An error means the dispatcher is gone, which is settled as well.
        let _ = settled.wait_for(|done| *done).await;
        debug!(target: "tagtrack.queue", job_id = %id, "Job settled");
    }

    /// Current state of `id`, if it was ever submitted here.
    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.inner.jobs().get(&id).map(|entry| entry.state)
    }

    /// Every job in submission order.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.inner
            .jobs()
            .iter()
            .map(|(id, entry)| JobSnapshot {
                id: *id,
                name: entry.name.clone(),
                state: entry.state,
            })
            .collect()
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("max_workers", &self.inner.max_workers)
            .field("jobs", &self.inner.jobs().len())
            .finish()
    }
}

// =============================================================================
// Worker tasks
// =============================================================================

async fn dispatch(
    inner: Arc<QueueInner>,
    id: JobId,
    work: Arc<dyn JobWork>,
    events: mpsc::UnboundedSender<TaskEvent>,
    cancel: CancellationToken,
    fan_out: JoinHandle<()>,
) {
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        let _ = fan_out.await;
        return;
    };

    let started = {
        let mut jobs = inner.jobs();
        match jobs.get_mut(&id) {
            Some(entry) if entry.state == JobState::Queued => {
                entry.state = JobState::Running;
                let _ = events.send(TaskEvent::running(id));
                true
            }
            _ => false,
        }
    };

    if started {
        debug!(target: "tagtrack.queue", job_id = %id, "Job running");
        let sinks = JobSinks::new(id, events);
        let outcome = match tokio::spawn(async move { work.run(sinks).await }).await {
            Ok(Ok(0)) => (JobState::Completed, TaskEvent::completed(id)),
            Ok(Ok(code)) => (JobState::Failed, TaskEvent::failed_code(id, code)),
            Ok(Err(err)) => (JobState::Failed, TaskEvent::failed_error(id, format!("{err:#}"))),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("job panicked: {}", panic_message(&*join_err.into_panic()))
                } else {
                    "job task was aborted".to_string()
                };
                (JobState::Failed, TaskEvent::failed_error(id, message))
            }
        };

        let mut jobs = inner.jobs();
        if let Some(entry) = jobs.get_mut(&id) {
            // A concurrent cancel already published the terminal state.
            if entry.state == JobState::Running {
                debug!(target: "tagtrack.queue", job_id = %id, state = %outcome.0, "Job finished");
                entry.finish(outcome.0, outcome.1);
            }
        }
    } else {
        drop(events);
    }

    // Keep the worker slot until subscribers have seen the terminal event.
    let _ = fan_out.await;
    drop(permit);
}

async fn fan_out(bus: Arc<EventBus>, id: JobId, mut events: mpsc::UnboundedReceiver<TaskEvent>) {
    while let Some(event) = events.recv().await {
        let failed = bus.emit(&event);
        log_handler_failures(id, event.topic().as_str(), failed);
        if event.is_terminal() {
            break;
        }
    }
}

fn log_handler_failures(id: JobId, topic: &str, failed: usize) {
    if failed > 0 {
        warn!(target: "tagtrack.queue", job_id = %id, topic, failed, "Event handlers panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tagtrack_core::Topic;
    use tokio::sync::Notify;

    use super::*;

    struct Returns(i32);

    #[async_trait]
    impl JobWork for Returns {
        async fn run(&self, sinks: JobSinks) -> anyhow::Result<i32> {
            sinks.log("working");
            Ok(self.0)
        }

        fn cancel(&self) {}
    }

    /// Blocks until released or canceled.
    #[derive(Default)]
    struct Gate {
        release: Notify,
        canceled: AtomicBool,
    }

    #[async_trait]
    impl JobWork for Gate {
        async fn run(&self, _sinks: JobSinks) -> anyhow::Result<i32> {
            self.release.notified().await;
            Ok(0)
        }

        fn cancel(&self) {
            self.canceled.store(true, Ordering::SeqCst);
            self.release.notify_one();
        }
    }

    fn state_log(bus: &EventBus) -> Arc<Mutex<Vec<(JobId, JobState)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(Topic::TaskState, move |event| {
            if let Some(state) = event.state() {
                sink.lock().unwrap().push((event.job_id(), state));
            }
        });
        seen
    }

    async fn wait_for(queue: &JobQueue, id: JobId, state: JobState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.state(id) != Some(state) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_states() {
        let bus = Arc::new(EventBus::new());
        let queue = JobQueue::new(Arc::clone(&bus), 2);

        let ok = queue.submit(Job::new("ok", Arc::new(Returns(0))));
        let bad = queue.submit(Job::new("bad", Arc::new(Returns(3))));

        wait_for(&queue, ok, JobState::Completed).await;
        wait_for(&queue, bad, JobState::Failed).await;
    }

    #[tokio::test]
    async fn test_queued_is_published_synchronously() {
        let bus = Arc::new(EventBus::new());
        let seen = state_log(&bus);
        let queue = JobQueue::new(Arc::clone(&bus), 1);

        let id = queue.submit(Job::new("sync", Arc::new(Returns(0))));

        assert_eq!(seen.lock().unwrap().first(), Some(&(id, JobState::Queued)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let bus = Arc::new(EventBus::new());
        let seen = state_log(&bus);
        let queue = JobQueue::new(bus, 1);

        assert!(!queue.cancel(JobId::new()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_job_invokes_hook() {
        let bus = Arc::new(EventBus::new());
        let queue = JobQueue::new(bus, 1);
        let gate = Arc::new(Gate::default());

        let id = queue.submit(Job::new("gate", Arc::clone(&gate) as Arc<dyn JobWork>));
        wait_for(&queue, id, JobState::Running).await;

        assert!(queue.cancel(id));
        assert!(gate.canceled.load(Ordering::SeqCst));
        assert_eq!(queue.state(id), Some(JobState::Canceled));
        assert!(!queue.cancel(id));
    }

    #[tokio::test]
    async fn test_wait_returns_after_canceled_work_returns() {
        let bus = Arc::new(EventBus::new());
        let queue = JobQueue::new(bus, 1);
        let gate = Arc::new(Gate::default());

        let id = queue.submit(Job::new("gate", Arc::clone(&gate) as Arc<dyn JobWork>));
        wait_for(&queue, id, JobState::Running).await;
        queue.cancel(id);

        tokio::time::timeout(Duration::from_secs(5), queue.wait(id))
            .await
            .unwrap();
        // The slot is free again.
        assert_eq!(queue.inner.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_wait_on_unknown_job_returns() {
        let queue = JobQueue::new(Arc::new(EventBus::new()), 1);
        tokio::time::timeout(Duration::from_secs(1), queue.wait(JobId::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_workers_clamped() {
        let queue = JobQueue::new(Arc::new(EventBus::new()), 0);
        assert_eq!(queue.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_keeps_submission_order() {
        let queue = JobQueue::new(Arc::new(EventBus::new()), 1);
        let a = queue.submit(Job::new("a", Arc::new(Returns(0))));
        let b = queue.submit(Job::new("b", Arc::new(Returns(0))));

        let names: Vec<_> = queue
            .snapshot()
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        assert_eq!(names, vec![(a, "a".to_string()), (b, "b".to_string())]);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
