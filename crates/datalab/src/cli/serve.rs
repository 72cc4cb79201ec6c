use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use datalab_runtime::{Database, GatewayServer};

use super::{init_tracing, load_config};

/// Run the HTTP gateway.
#[derive(Parser)]
pub struct ServeCommand {
    /// Port to listen on (overrides config).
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let mut config = load_config(config_path)?;
        init_tracing(&config.logging);

        if let Some(port) = self.port {
            config.gateway.port = port;
        }

        println!();
        println!(
            "  {}  {} v{}",
            style("⚒️").bold(),
            style("datalab").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "  {} Listening on {}",
            style("🌐").bold(),
            style(format!("http://0.0.0.0:{}", config.gateway.port)).cyan()
        );
        println!();

        info!("Connecting to database");
        let db = Database::from_config(&config.database).await?;
        db.health_check().await?;

        let server = GatewayServer::new(config.gateway, db.primary().clone());
        server.run().await?;

        db.close().await;
        Ok(())
    }
}
