mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use service_fleet::{Error as FleetError, Options, Parser as ConfigParser};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(fleet_error) = e.downcast_ref::<FleetError>() {
            eprintln!("Error: {}", fleet_error);
            if let Some(suggestion) = fleet_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    // ── Commands that need no parsed config ──────────────────────────
    if let Commands::Validate = cli.command {
        return commands::run_validate(cli.config.clone(), &output::CliOutput);
    }

    // ── Load config ─────────────────────────────────────────────────
    let parser = ConfigParser::new();
    let config_path = if let Some(path) = cli.config.clone() {
        path
    } else {
        parser.find_config_file()?
    };
    let config = parser.load_config(&config_path)?;
    config.validate()?;

    let work_dir = resolve_work_dir(cli.workdir, &config_path)?;
    let mut options = Options::from_config(&config, &work_dir);
    if let Some(env) = cli.env {
        options = options.with_environment(env);
    }
    tracing::debug!(
        "Loaded {} (environment '{}', store {})",
        config_path.display(),
        options.environment,
        options.store_dir.display()
    );

    match cli.command {
        Commands::Up { only, skip } => {
            let options = options.with_filters(only, skip);
            commands::run_up(&config, options, &output::CliOutput).await?;
        }
        Commands::Down => {
            commands::run_down(&config, &options, &output::CliOutput).await?;
        }
        Commands::Status { json } => {
            commands::run_status(&config, &options, json, &output::CliOutput).await?;
        }
        Commands::Identity => {
            commands::run_identity(&options, &output::CliOutput).await?;
        }
        Commands::Routes => {
            commands::run_routes(&config, &options, &output::CliOutput)?;
        }
        Commands::Validate => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Resolve the work directory from CLI `--workdir` or the config file's parent directory.
fn resolve_work_dir(workdir: Option<PathBuf>, config_path: &Path) -> anyhow::Result<PathBuf> {
    if let Some(workdir) = workdir {
        return Ok(workdir);
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
