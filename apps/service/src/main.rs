use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pingwatch_service::{Config, Orchestrator, open_local};

/// pingwatch daemon - monitors registered endpoints without the HTTP surface
#[derive(Parser, Debug)]
#[command(name = "pingwatch-service")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    PINGWATCH_DATABASE    Database file (overrides the config file)
    RUST_LOG              Log filter (default: info)
    RUST_LOG_FORMAT       json | pretty | compact
"#)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/pingwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the config file
    #[arg(short, long)]
    database: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_tracing();

    let mut config = Config::from_config(cli.config.as_ref()).context("Failed to load config")?;
    config.apply_env_overrides()?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    info!(path = %config.database.path, "Opening database");
    let database = open_local(&config.database.path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path))?;

    let orchestrator = Orchestrator::start(config.monitoring.clone(), Arc::new(database)).await?;

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    orchestrator.shutdown().await;
    Ok(())
}
