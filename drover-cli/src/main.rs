//! Drover CLI
//!
//! Command-line interface for running and administering Drover jobs.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Drover job framework CLI", long_about = None)]
struct Cli {
    /// Drover service URL
    #[arg(long, env = "DROVER_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Act as this user
    #[arg(long, env = "DROVER_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        url: cli.url,
        user: cli.user,
    };

    handle_command(cli.command, &config).await
}
