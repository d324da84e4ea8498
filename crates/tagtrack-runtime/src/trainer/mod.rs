//! Per-backend trainer runners.
//!
//! A [`ProcessRunner`] turns a [`TrainingConfig`] into a command line, runs
//! the external trainer and translates its output into log lines and
//! progress records. Without a configured trainer program it simulates the
//! run instead.
//!
//! # Cancellation
//!
//! Each run owns a [`CancellationToken`]. Canceling it sends a graceful stop
//! to the trainer's process group; if the trainer is still alive after the
//! grace period it is killed. The read loop keeps forwarding output until
//! the streams close.

mod args;
mod patterns;
mod simulate;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tagtrack_core::{ProgressRecord, Settings, TrainerLaunch, TrainingBackend, TrainingConfig};

use crate::process::{CommandSpec, ProcessError, TrainerProcess};
use crate::queue::{Job, JobSinks, JobWork};

pub use args::{ArgRule, BackendProfile};
pub use patterns::{
    LineFields, MUSUBI_PATTERNS, PatternError, PatternTable, ProgressField, ProgressTracker,
};
pub use simulate::{SIM_CANCELED_CODE, SimulationCadence};

/// Where a run sends its output.
pub trait TrainerOutput: Send + Sync {
    fn log(&self, line: String);
    fn progress(&self, record: ProgressRecord);
}

impl TrainerOutput for JobSinks {
    fn log(&self, line: String) {
        Self::log(self, line);
    }

    fn progress(&self, record: ProgressRecord) {
        Self::progress(self, record);
    }
}

/// Errors that end a run without an exit code.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Failed waiting for trainer exit: {0}")]
    Wait(#[source] std::io::Error),
}

/// How a runner launches and stops its trainer.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// `None` runs the simulation.
    pub launch: Option<TrainerLaunch>,
    pub device_env_var: String,
    pub stop_grace: Duration,
    pub cadence: SimulationCadence,
}

impl RunnerOptions {
    pub fn from_settings(settings: &Settings, backend: TrainingBackend) -> Self {
        Self {
            launch: settings.trainer_launch(backend),
            device_env_var: settings.effective_device_env_var().to_string(),
            stop_grace: settings.effective_stop_grace(),
            cadence: SimulationCadence {
                step_interval: settings.effective_sim_step_interval(),
                report_every: settings.effective_sim_report_every(),
            },
        }
    }

    /// Simulation with default pacing.
    pub fn simulated() -> Self {
        Self {
            launch: None,
            device_env_var: tagtrack_core::settings::DEFAULT_DEVICE_ENV_VAR.to_string(),
            stop_grace: Duration::from_secs(tagtrack_core::settings::DEFAULT_STOP_GRACE_SECS),
            cadence: SimulationCadence::default(),
        }
    }

    #[must_use]
    pub fn with_launch(mut self, launch: TrainerLaunch) -> Self {
        self.launch = Some(launch);
        self
    }

    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    #[must_use]
    pub const fn with_cadence(mut self, cadence: SimulationCadence) -> Self {
        self.cadence = cadence;
        self
    }
}

/// Runs training jobs for one backend.
#[derive(Debug)]
pub struct ProcessRunner {
    profile: BackendProfile,
    options: RunnerOptions,
}

impl ProcessRunner {
    pub fn new(backend: TrainingBackend, options: RunnerOptions) -> Self {
        Self {
            profile: BackendProfile::for_backend(backend),
            options,
        }
    }

    pub const fn backend(&self) -> TrainingBackend {
        self.profile.backend
    }

    pub const fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Full command line for `cfg`, or `None` when the run would be simulated.
    pub fn compose_command(&self, cfg: &TrainingConfig) -> Option<CommandSpec> {
        let launch = self.options.launch.as_ref()?;
        Some(
            CommandSpec::new(&launch.program)
                .args(launch.leading_args.iter().cloned())
                .args(self.profile.compose_args(cfg))
                .env(&self.options.device_env_var, cfg.gpu_index.to_string()),
        )
    }

    /// A cancellable run of `cfg` on this runner.
    pub fn training_run(self: &Arc<Self>, cfg: TrainingConfig, total_steps: u64) -> TrainingRun {
        TrainingRun {
            runner: Arc::clone(self),
            cfg,
            total_steps,
            stop: CancellationToken::new(),
        }
    }

    /// A queue job whose output goes straight to the job sinks.
    pub fn build_job(self: &Arc<Self>, cfg: TrainingConfig, total_steps: u64) -> Job {
        let name = cfg.name.clone();
        Job::new(name, Arc::new(self.training_run(cfg, total_steps)))
    }
}

/// One training run. Executes at most once; cancel is idempotent.
#[derive(Debug)]
pub struct TrainingRun {
    runner: Arc<ProcessRunner>,
    cfg: TrainingConfig,
    total_steps: u64,
    stop: CancellationToken,
}

impl TrainingRun {
    pub const fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Request the run to stop. No-op once it has finished.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run to completion and return the trainer's exit code.
    pub async fn execute(&self, out: &dyn TrainerOutput) -> Result<i32, TrainerError> {
        let profile = &self.runner.profile;
        let Some(spec) = self.runner.compose_command(&self.cfg) else {
            debug!(target: "tagtrack.trainer", backend = %profile.backend, name = %self.cfg.name, "No trainer configured, simulating");
            return Ok(simulate::simulate(
                profile.label,
                &self.cfg,
                self.total_steps,
                self.runner.options.cadence,
                &self.stop,
                out,
            )
            .await);
        };

        if self.stop.is_cancelled() {
            debug!(target: "tagtrack.trainer", name = %self.cfg.name, "Run canceled before start");
            return Ok(SIM_CANCELED_CODE);
        }

        info!(target: "tagtrack.trainer", backend = %profile.backend, command = %spec.display(), "Starting trainer");
        let (mut process, mut lines) = TrainerProcess::spawn(&spec)?;
        let mut tracker = ProgressTracker::new(profile.patterns, self.total_steps, self.cfg.epochs);
        let grace = self.runner.options.stop_grace;
        let mut stop = StopState::Running;

        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    let record = tracker.observe(&line);
                    out.log(line);
                    if let Some(record) = record {
                        out.progress(record);
                    }
                }
                () = self.stop.cancelled(), if stop == StopState::Running => {
                    info!(target: "tagtrack.trainer", pid = ?process.pid(), "Stopping trainer");
                    if let Err(e) = process.request_stop() {
                        warn!(target: "tagtrack.trainer", error = %e, "Graceful stop failed");
                    }
                    stop = StopState::Stopping(Instant::now() + grace);
                }
                () = wait_deadline(stop.deadline()), if stop.deadline().is_some() => {
                    warn!(target: "tagtrack.trainer", pid = ?process.pid(), "Trainer ignored stop request, killing");
                    kill(&mut process);
                    stop = StopState::Killed;
                }
            }
        }

        let code = match stop.deadline() {
            Some(deadline) => match timeout_at(deadline, process.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(target: "tagtrack.trainer", pid = ?process.pid(), "Trainer outlived its grace period, killing");
                    kill(&mut process);
                    process.wait().await
                }
            },
            None => process.wait().await,
        }
        .map_err(TrainerError::Wait)?;

        info!(target: "tagtrack.trainer", name = %self.cfg.name, code, "Trainer exited");
        Ok(code)
    }
}

#[async_trait]
impl JobWork for TrainingRun {
    async fn run(&self, sinks: JobSinks) -> anyhow::Result<i32> {
        Ok(self.execute(&sinks).await?)
    }

    fn cancel(&self) {
        Self::cancel(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopState {
    Running,
    Stopping(Instant),
    Killed,
}

impl StopState {
    const fn deadline(self) -> Option<Instant> {
        match self {
            Self::Stopping(deadline) => Some(deadline),
            Self::Running | Self::Killed => None,
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn kill(process: &mut TrainerProcess) {
    if let Err(e) = process.kill() {
        warn!(target: "tagtrack.trainer", error = %e, "Failed to kill trainer");
    }
}
