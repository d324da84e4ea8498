//! Backends command handler.
//!
//! Lists every registered backend with its preset and whether runs on it
//! launch a trainer or are simulated.

use tagtrack_core::TrainingBackend;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub fn execute(ctx: &CliContext) -> Result<(), CliError> {
    println!(
        "{:<22} {:<10} {:<6} {:<6} {:<10} {:<8} Trainer",
        "Backend", "Resolution", "Batch", "Accum", "Optimizer", "LR"
    );
    println!("{}", "-".repeat(80));

    for backend in ctx.manager.backends() {
        let trainer = ctx
            .manager
            .runner(backend)
            .and_then(|runner| runner.options().launch.as_ref())
            .map_or_else(
                || "simulated".to_string(),
                |launch| launch_summary(&launch.program, &launch.leading_args),
            );
        println!("{} {trainer}", preset_row(backend));
    }
    Ok(())
}

fn preset_row(backend: TrainingBackend) -> String {
    let preset = backend.preset();
    format!(
        "{:<22} {:<10} {:<6} {:<6} {:<10} {:<8}",
        backend.as_str(),
        preset.resolution,
        preset.batch_size,
        preset.grad_accum,
        preset.optimizer,
        format!("{:e}", preset.lr),
    )
}

fn launch_summary(program: &std::path::Path, leading_args: &[String]) -> String {
    let mut summary = program.display().to_string();
    for arg in leading_args {
        summary.push(' ');
        summary.push_str(arg);
    }
    summary
}
