//! ratekeeper - fetch from rate limited HTTP APIs.
//!
//! Thin command line wrapper around the library's request manager.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RATEKEEPER_* and RUST_LOG may come from a .env file.
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "ratekeeper=info"
    } else {
        "ratekeeper=warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    cli::run().await
}
