//! CLI entry point.
//!
//! Parses arguments, layers flags over the environment, bootstraps the
//! context and dispatches to a handler. Handler errors become the process
//! exit code.

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use tagtrack_cli::{Cli, CliConfig, CliError, Commands, bootstrap, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        // No command provided - show help
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Err(err) = run(command, cli.datasets_dir, cli.max_workers).await {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    command: Commands,
    datasets_dir: Option<PathBuf>,
    max_workers: Option<usize>,
) -> Result<(), CliError> {
    let config = CliConfig::from_env()?
        .with_datasets_dir(datasets_dir)
        .with_max_workers(max_workers);

    match command {
        Commands::Train {
            run,
            trainer_script,
            dry_run,
            json,
        } => {
            let config = match trainer_script {
                Some(script) => config.with_trainer_script(run.backend, script),
                None if dry_run => config.simulated(),
                None => config,
            };
            let ctx = bootstrap(config)?;
            handlers::train::execute(&ctx, &run, json).await
        }
        Commands::Steps { run } => handlers::steps::execute(&bootstrap(config)?, &run),
        Commands::Backends => handlers::backends::execute(&bootstrap(config)?),
    }
}
