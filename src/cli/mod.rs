pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::cli::config::{CrawlerConfig, LogFormat};
use crate::utils::{default_log_file, init_logging};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Also write logs to a file
    #[arg(long, global = true)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run crawl workers until interrupted
    Work {
        /// Number of concurrent workers (overrides worker.workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Load seed URLs from a CSV file (url,niche,priority)
    Seed {
        #[arg(required = true)]
        file: PathBuf,

        /// Seed even if the queue is not empty
        #[arg(short, long)]
        force: bool,
    },

    /// Show queue, dedup set and fallback log counters
    Status,

    /// Show the effective configuration
    Config {
        /// Write a default configuration file instead
        #[arg(long)]
        init: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Load configuration, set up logging and run the command
pub async fn process_command(cli: Cli) -> Result<()> {
    if let Commands::Config { init: true } = cli.command {
        init_logging(cli.verbose, LogFormat::Text, None)?;
        return commands::init_config(cli.config.as_deref());
    }

    let config = CrawlerConfig::load(cli.config.as_deref())?;

    let format = if cli.json { LogFormat::Json } else { config.logging.format };
    let log_file = match (&config.logging.file, cli.log_to_file) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(default_log_file()),
        (None, false) => None,
    };
    init_logging(cli.verbose, format, log_file.as_deref())?;

    info!("lead-crawler v{} on {}", env!("CARGO_PKG_VERSION"), config.worker.machine_id);

    match cli.command {
        Commands::Work { workers } => commands::work(config, workers).await,
        Commands::Seed { file, force } => commands::seed(&config, &file, force).await,
        Commands::Status => commands::status(&config).await,
        Commands::Config { .. } => commands::show_config(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["lead-crawler", "work", "--workers", "3", "-v", "--config", "c.yaml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        assert!(matches!(cli.command, Commands::Work { workers: Some(3) }));
    }

    #[test]
    fn test_seed_requires_file() {
        assert!(Cli::try_parse_from(["lead-crawler", "seed"]).is_err());
        let cli = Cli::try_parse_from(["lead-crawler", "seed", "urls.csv", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Seed { force: true, .. }));
    }
}
