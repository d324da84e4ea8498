//! Steps command handler.

use tagtrack_core::TrainingConfig;
use tagtrack_runtime::TrainingManager;

use crate::bootstrap::CliContext;
use crate::commands::RunArgs;
use crate::error::CliError;

/// Print the step arithmetic for the run described by `args`.
pub fn execute(ctx: &CliContext, args: &RunArgs) -> Result<(), CliError> {
    let cfg = ctx.resolve_config(args)?;
    cfg.validate()?;
    print!("{}", breakdown(&cfg));
    Ok(())
}

fn breakdown(cfg: &TrainingConfig) -> String {
    format!(
        "{name} ({backend})\n  \
         images x repeats:   {images} x {repeats}\n  \
         batch x grad accum: {batch} x {accum}\n  \
         steps per epoch:    {per_epoch}\n  \
         epochs:             {epochs}\n  \
         total steps:        {total}\n",
        name = cfg.name,
        backend = cfg.backend,
        images = cfg.dataset_size,
        repeats = cfg.repeats,
        batch = cfg.batch_size,
        accum = cfg.grad_accum,
        per_epoch = cfg.steps_per_epoch(),
        epochs = cfg.epochs,
        total = TrainingManager::total_steps(cfg),
    )
}
