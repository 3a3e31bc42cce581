//! pagecast CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pagecast")]
#[command(about = "pagecast static-site deployment worker and job tools", long_about = None)]
struct Cli {
    /// Configuration file (KDL); `pagecast.kdl` is used when present
    #[arg(long, global = true, env = "PAGECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "PAGECAST_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Process deployment jobs until interrupted
    Worker {
        /// Identity recorded on claimed jobs
        #[arg(long, env = "PAGECAST_WORKER_ID")]
        id: Option<String>,
        /// Keep the workspace of successful jobs
        #[arg(long)]
        keep_workspace: bool,
        /// Keep the workspace of failed jobs for inspection
        #[arg(long)]
        keep_failed_workspace: bool,
    },
    /// Queue an already-uploaded job
    Enqueue {
        /// Job ID
        id: String,
    },
    /// Show a job's current status
    Status {
        /// Job ID
        id: String,
    },
    /// Apply database migrations
    Migrate,
    /// Validate configuration without connecting to anything
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Worker {
            id,
            keep_workspace,
            keep_failed_workspace,
        } => {
            commands::worker::run(config, id, keep_workspace, keep_failed_workspace).await?;
        }
        Commands::Enqueue { id } => {
            commands::jobs::enqueue(config, &id).await?;
        }
        Commands::Status { id } => {
            commands::jobs::status(config, &id).await?;
        }
        Commands::Migrate => {
            commands::jobs::migrate(config).await?;
        }
        Commands::ValidateConfig => {
            commands::validate_config(config)?;
        }
    }

    Ok(())
}
