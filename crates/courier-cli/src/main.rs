//! Courier entrypoint.

use clap::Parser;
use courier_trace::{init_tracing, shutdown_tracing};
use std::path::PathBuf;

mod commands;
mod handlers;
mod settings;

use commands::Commands;
use settings::CourierConfig;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about = "Password reset mail pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./courier.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = CourierConfig::load(cli.config.as_deref())?;
    config.validate()?;

    let provider = init_tracing(&config.service_name, &config.telemetry)?;

    tracing::info!(
        service = %config.service_name,
        queue = %config.queue.name,
        command = ?cli.command,
        "Starting courier"
    );

    let result = match cli.command {
        Commands::Api => handlers::api(&config).await,
        Commands::Worker => handlers::worker(&config).await,
        Commands::Standalone => handlers::standalone(&config).await,
    };

    shutdown_tracing(&provider);
    result
}
