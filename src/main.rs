//! image-builder CLI entry point
//!
//! Loads configuration and dispatches to subcommands.

use clap::Parser;
use console::style;
use image_builder::cli::{commands, Cli, Commands};
use image_builder::config::{Config, ConfigManager};
use image_builder::error::ImageBuilderResult;
use std::process::ExitCode;
use tracing::debug;
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

async fn run() -> ImageBuilderResult<()> {
    let cli = Cli::parse();

    // Completions don't need config loading
    if let Commands::Completions { shell } = cli.command {
        return commands::completions(shell);
    }

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Build(args) => commands::build(args, &config).await,
        Commands::GetStaleImages(args) => commands::stale(args, &config).await,
        Commands::MergeImageInfo(args) => commands::merge(args).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
        Commands::Completions { .. } => unreachable!("Completions handled above"),
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` counts as one -v
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.saturating_add(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("image_builder=warn"),
        1 => EnvFilter::new("image_builder=info"),
        _ => EnvFilter::new("image_builder=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
