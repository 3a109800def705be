//! Command line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ratekeeper::ManagerConfig;

#[derive(Parser)]
#[command(name = "ratekeeper")]
#[command(about = "Fetch from rate limited HTTP APIs without tripping their limits")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON). Discovered automatically when omitted
    #[arg(short, long, global = true, env = "RATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Queue one or more GET requests and wait for all of them
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
        /// Endpoint key to account the requests against (default: routed from each URL)
        #[arg(short, long)]
        endpoint: Option<String>,
        /// Queue priority, lower is served first
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
        /// Print the status summary as JSON afterwards
        #[arg(short, long)]
        summary: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => ManagerConfig::load_from_path(path).await?,
        None => ManagerConfig::load().await,
    };

    match cli.command {
        Commands::Fetch {
            urls,
            endpoint,
            priority,
            summary,
        } => commands::cmd_fetch(config, &urls, endpoint.as_deref(), priority, summary).await,
        Commands::Config => commands::cmd_config(&config),
    }
}
