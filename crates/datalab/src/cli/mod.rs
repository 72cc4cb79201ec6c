mod migrate;
mod serve;

pub use migrate::MigrateCommand;
pub use serve::ServeCommand;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use datalab_core::config::{DatalabConfig, LoggingConfig};

/// datalab - schema migrations and dataset catalogue service
#[derive(Parser)]
#[command(name = "datalab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, default_value = "datalab.toml", global = true)]
    pub config: String,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage database migrations.
    Migrate(MigrateCommand),

    /// Run the HTTP gateway.
    Serve(ServeCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Migrate(cmd) => cmd.execute(&self.config).await,
            Commands::Serve(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Load the config file, or fall back to environment variables when it is absent.
pub(crate) fn load_config(path: &str) -> Result<DatalabConfig> {
    dotenvy::dotenv().ok();

    if Path::new(path).exists() {
        DatalabConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))
    } else {
        DatalabConfig::from_env().with_context(|| {
            format!(
                "Configuration file not found: {}\nCreate it or set DATABASE_URL.",
                path
            )
        })
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if logging.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
