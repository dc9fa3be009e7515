//! Foreman CLI — the main entry point.
//!
//! Commands:
//! - `chain run`      — Run a chain from a fixture file until it pauses or ends
//! - `chain validate` — Check a fixture's chain definitions
//! - `memory sweep`   — Hard-delete expired memory entries
//! - `config show`    — Print the effective configuration
//! - `config init`    — Write a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use foreman_config::{AppConfig, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod fixture;

#[derive(Parser)]
#[command(
    name = "foreman",
    about = "Foreman — agent orchestration with budgets, scoped memory and workflow chains",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.foreman/config.toml
    #[arg(long, global = true, env = "FOREMAN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and inspect workflow chains
    Chain {
        #[command(subcommand)]
        action: ChainAction,
    },

    /// Maintain stored agent memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ChainAction {
    /// Run a chain defined in a fixture file
    Run {
        /// Fixture file (TOML)
        fixture: PathBuf,

        /// Name of the chain to run
        #[arg(short, long)]
        chain: String,

        /// Persist runs and memory to this SQLite URL instead of memory
        #[arg(long)]
        db: Option<String>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the chain definitions of a fixture file
    Validate {
        /// Fixture file (TOML)
        fixture: PathBuf,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Hard-delete every expired memory entry
    Sweep {
        /// SQLite URL (defaults to database.url from config)
        #[arg(long)]
        db: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_tracing(cli.verbose, &config.logging);

    match cli.command {
        Commands::Chain { action } => match action {
            ChainAction::Run {
                fixture,
                chain,
                db,
                json,
            } => commands::chain::run(&config, &fixture, &chain, db.as_deref(), json).await?,
            ChainAction::Validate { fixture } => commands::chain::validate(&fixture)?,
        },
        Commands::Memory { action } => match action {
            MemoryAction::Sweep { db } => commands::memory::sweep(&config, db.as_deref()).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config)?,
            ConfigAction::Init { force } => {
                commands::config_cmd::init(cli.config.as_deref(), force)?
            }
        },
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return AppConfig::load().context("Failed to load config");
    };
    let mut config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}

/// Logs go to stderr so stdout stays clean for reports.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let default = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
