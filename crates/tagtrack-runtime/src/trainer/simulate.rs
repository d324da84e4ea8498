//! Dry-run training used when no trainer program is configured.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tagtrack_core::{ProgressRecord, TrainingConfig};

use super::TrainerOutput;

/// Exit code reported when a simulated run is canceled.
pub const SIM_CANCELED_CODE: i32 = 130;

/// Pace of a simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationCadence {
    pub step_interval: Duration,
    /// Progress is reported every this many steps, and always at the last one.
    pub report_every: u64,
}

impl Default for SimulationCadence {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_millis(50),
            report_every: 10,
        }
    }
}

/// Walk through `total_steps` synthetic steps, reporting like a trainer would.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub async fn simulate(
    label: &str,
    cfg: &TrainingConfig,
    total_steps: u64,
    cadence: SimulationCadence,
    stop: &CancellationToken,
    out: &dyn TrainerOutput,
) -> i32 {
    out.log(format!("[DRYRUN] {label} training simulation started"));

    let report_every = cadence.report_every.max(1);
    let steps_per_epoch = cfg.steps_per_epoch().max(1);
    let total_epochs = cfg.epochs.max(1);
    let start = Instant::now();

    for step in 1..=total_steps {
        tokio::select! {
            () = stop.cancelled() => {
                out.log(format!("[DRYRUN] Training canceled at step {}/{total_steps}.", step - 1));
                return SIM_CANCELED_CODE;
            }
            () = tokio::time::sleep(cadence.step_interval) => {}
        }

        if step % report_every != 0 && step != total_steps {
            continue;
        }

        let epoch = u32::try_from(1 + (step - 1) / steps_per_epoch).unwrap_or(u32::MAX);
        let elapsed = start.elapsed().as_secs_f64().max(1e-3);
        let sps = step as f64 / elapsed;
        let eta = ((total_steps - step) as f64 / sps.max(1e-6)) as u64;
        let loss = (step % 100) as f64 / 100.0;

        out.log(format!(
            "[SIM] step {step}/{total_steps} epoch {epoch}/{total_epochs} loss={loss:.2} lr={} ETA {eta}s",
            cfg.lr
        ));
        out.progress(ProgressRecord {
            step,
            total_steps,
            epoch: Some(epoch),
            total_epochs: Some(total_epochs),
            ips: Some((sps * f64::from(cfg.batch_size.max(1)) * 100.0).round() / 100.0),
            eta_secs: Some(eta),
            loss: Some(loss),
            lr: Some(cfg.lr),
        });
    }

    out.log("[DRYRUN] Training finished.".to_string());
    0
}
