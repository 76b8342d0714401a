mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tidemark",
    version,
    about = "Checkpointed event delivery with replay of failed records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a delivery pipeline
    Run {
        /// Path to run config YAML file
        config: PathBuf,
        /// Override a run setting, e.g. --set is_retry=false (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Validate run config and hook connectivity
    Check {
        /// Path to run config YAML file
        config: PathBuf,
    },
    /// Show recent runs and outstanding failed events
    Status {
        /// Path to run config YAML file
        config: PathBuf,
        /// Only list failures for this source location
        #[arg(long)]
        location: Option<String>,
        /// Number of runs to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Remove checkpoint rows older than the retention horizon
    Sweep {
        /// Path to run config YAML file
        config: PathBuf,
        /// Retention horizon in days (defaults to the days_to_live setting)
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config, set } => commands::run::execute(&config, &set).await,
        Commands::Check { config } => commands::check::execute(&config).await,
        Commands::Status { config, location, limit } => {
            commands::status::execute(&config, location.as_deref(), limit)
        }
        Commands::Sweep { config, days } => commands::sweep::execute(&config, days),
    }
}
