//! Prefetch Worker - background bundle prefetch cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use prefetch_worker::cli::{Cli, Commands};
use prefetch_worker::config::{Config, ConfigManager};
use prefetch_worker::error::PrefetchResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PrefetchResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);

    // Dispatch to command
    match cli.command {
        Commands::Replay(args) => prefetch_worker::cli::commands::replay(args, &config).await,
        Commands::Cache(args) => prefetch_worker::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            prefetch_worker::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let level = match (verbose, config.general.verbose) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::new(format!("prefetch_worker={}", level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}
