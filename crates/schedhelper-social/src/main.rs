#![warn(missing_docs)]

//! `sh-admin`: operator tool for the Schedule Helper social backend.

use anyhow::Result;
use clap::Parser;
use schedhelper_social::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!(table = %config.table_name, "sh-admin starting");
    cli.run(config).await
}
