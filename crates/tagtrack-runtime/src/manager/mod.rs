//! Training submission facade.
//!
//! [`TrainingManager`] owns the event bus, the job queue and one
//! [`ProcessRunner`] per backend. It sizes each run, wraps the runner's
//! output with ETA enrichment and submits the result as a queue job.

mod eta;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tagtrack_core::{
    DatasetCatalog, EventBus, JobId, Settings, TrainingBackend, TrainingConfig, TrainingError,
};

use crate::logfile::JobLogFiles;
use crate::queue::{Job, JobQueue, JobSinks, JobWork};
use crate::trainer::{ProcessRunner, RunnerOptions, TrainingRun};

pub use eta::{EnrichingOutput, SpeedCache};

pub struct TrainingManager {
    queue: JobQueue,
    runners: HashMap<TrainingBackend, Arc<ProcessRunner>>,
    speed: Arc<SpeedCache>,
}

impl TrainingManager {
    /// Manager over an existing queue, with no runners registered.
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            runners: HashMap::new(),
            speed: Arc::new(SpeedCache::new()),
        }
    }

    /// Manager with a fresh bus and queue and a runner for every backend.
    ///
    /// With a `log_dir` configured, every job's output is also written to its
    /// realtime log file.
    pub fn with_settings(settings: &Settings) -> Self {
        let bus = Arc::new(EventBus::new());
        if let Some(dir) = settings.log_dir.as_deref() {
            JobLogFiles::new(dir).attach(&bus);
        }
        let queue = JobQueue::new(bus, settings.effective_max_workers());
        let mut manager = Self::new(queue);
        for backend in TrainingBackend::ALL {
            manager.register(ProcessRunner::new(
                backend,
                RunnerOptions::from_settings(settings, backend),
            ));
        }
        manager
    }

    /// Register `runner` for its backend, returning the one it replaces.
    pub fn register(&mut self, runner: ProcessRunner) -> Option<Arc<ProcessRunner>> {
        self.runners.insert(runner.backend(), Arc::new(runner))
    }

    pub fn runner(&self, backend: TrainingBackend) -> Option<&Arc<ProcessRunner>> {
        self.runners.get(&backend)
    }

    /// Registered backends, sorted.
    pub fn backends(&self) -> Vec<TrainingBackend> {
        let mut backends: Vec<_> = self.runners.keys().copied().collect();
        backends.sort();
        backends
    }

    /// Authoritative step count for `cfg`.
    pub const fn total_steps(cfg: &TrainingConfig) -> u64 {
        cfg.total_steps()
    }

    /// Validate and submit a training run, returning its job id.
    ///
    /// Only submission problems are returned here. Everything that goes
    /// wrong once the run started is reported as a `FAILED` task state.
    pub fn run_training(&self, cfg: TrainingConfig) -> Result<JobId, TrainingError> {
        cfg.validate()?;
        let total = Self::total_steps(&cfg);
        let runner = self
            .runners
            .get(&cfg.backend)
            .ok_or_else(|| TrainingError::UnknownBackend(cfg.backend.to_string()))?;

        let name = cfg.name.clone();
        let backend = cfg.backend;
        let work = ManagedTraining {
            run: runner.training_run(cfg, total),
            speed: Arc::clone(&self.speed),
        };
        let id = self.queue.submit(Job::new(name.clone(), Arc::new(work)));

        info!(target: "tagtrack.manager", job_id = %id, %name, %backend, total_steps = total, "Training submitted");
        Ok(id)
    }

    /// Like [`run_training`](Self::run_training), with the dataset size read
    /// from `catalog` at submission time.
    pub fn run_training_for_dataset(
        &self,
        catalog: &dyn DatasetCatalog,
        cfg: TrainingConfig,
    ) -> Result<JobId, TrainingError> {
        let info = catalog.dataset(&cfg.dataset_id)?;
        self.run_training(cfg.with_dataset_size(info.image_count))
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.queue.cancel(id)
    }

    /// Wait until the run `id` has settled. After a cancel this is the point
    /// where the trainer process has exited.
    pub async fn wait(&self, id: JobId) {
        self.queue.wait(id).await;
    }

    /// Per-job speed samples behind the fallback ETA.
    pub fn speed_cache(&self) -> &SpeedCache {
        &self.speed
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.queue.bus()
    }

    pub const fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl std::fmt::Debug for TrainingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingManager")
            .field("queue", &self.queue)
            .field("backends", &self.backends())
            .finish_non_exhaustive()
    }
}

/// A training run whose progress is enriched before publishing.
struct ManagedTraining {
    run: TrainingRun,
    speed: Arc<SpeedCache>,
}

#[async_trait]
impl JobWork for ManagedTraining {
    async fn run(&self, sinks: JobSinks) -> anyhow::Result<i32> {
        let id = sinks.id();
        let output = EnrichingOutput {
            inner: &sinks,
            cache: &self.speed,
            id,
            total_steps: self.run.total_steps(),
        };
        let _forget = ForgetOnDrop {
            cache: &self.speed,
            id,
        };
        Ok(self.run.execute(&output).await?)
    }

    fn cancel(&self) {
        self.run.cancel();
    }
}

/// Drops the job's speed samples however the run ends.
struct ForgetOnDrop<'a> {
    cache: &'a SpeedCache,
    id: JobId,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.cache.forget(self.id);
    }
}
