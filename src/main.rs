mod main_runtime;

use anyhow::Context;
use clap::Parser;
use sigmarket::adapters::{start_api_server, SqliteStore};
use sigmarket::api::AppState;
use sigmarket::cli::{Cli, Commands};
use sigmarket::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info, warn};

use main_runtime::{init_logging, init_logging_simple, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, defaults } => {
            let mut config = if defaults {
                AppConfig::default_config()
            } else {
                AppConfig::load_from(&cli.config_dir)
                    .with_context(|| format!("loading configuration from {}", cli.config_dir))?
            };
            if let Some(port) = port {
                config.server.port = port;
            }

            let _guard = init_logging(&config.logging);
            run_server(config).await?;
        }
        Commands::Migrate => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            let store = SqliteStore::new(&config.database.url, config.database.max_connections)
                .await
                .context("opening database")?;
            store.migrate().await.context("applying migrations")?;
            println!("Migrations applied to {}", config.database.url);
        }
        Commands::CheckConfig => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            match config.validate() {
                Ok(()) => println!("Configuration OK"),
                Err(problems) => {
                    for problem in &problems {
                        eprintln!("  - {}", problem);
                    }
                    anyhow::bail!("{} configuration problem(s)", problems.len());
                }
            }
        }
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!(problem = %problem, "Invalid configuration");
        }
        anyhow::bail!("{} configuration problem(s)", problems.len());
    }
    if config.auth.admin_token.is_none() {
        warn!("auth.admin_token not set; settlement and market callbacks are disabled");
    }

    let store = SqliteStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("opening database")?;
    store.migrate().await.context("applying migrations")?;

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = AppState::from_config(config, Arc::new(store))?;

    info!(host = %host, port, "Starting sigmarket");
    start_api_server(state, &host, port, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}
