use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sigmarket")]
#[command(author = "Sigmarket Team")]
#[command(version)]
#[command(about = "Trading-signal marketplace backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, global = true, default_value = "config", env = "SIGMARKET_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
        /// Ignore config files and run on the built-in in-memory configuration
        #[arg(long)]
        defaults: bool,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Load and validate configuration, reporting every problem
    CheckConfig,
}
