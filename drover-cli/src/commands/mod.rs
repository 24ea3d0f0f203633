//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod approval;
mod init;
mod job;
mod result;

pub use approval::ApprovalCommands;
pub use init::InitCommands;
pub use job::JobCommands;
pub use result::ResultCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job catalog and runs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Job results, logs and files
    Result {
        #[command(subcommand)]
        command: ResultCommands,
    },
    /// Held runs and approvals
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Rediscover job sources and sync job records
    Refresh,
    /// Initialize a Lua job development environment
    Init {
        #[command(subcommand)]
        command: InitCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Result { command } => result::handle_result_command(command, config).await,
        Commands::Approval { command } => approval::handle_approval_command(command, config).await,
        Commands::Refresh => refresh(config).await,
        Commands::Init { command } => init::handle_init_command(command),
    }
}

async fn refresh(config: &Config) -> Result<()> {
    let report = config.client().refresh_jobs().await?;

    if report.is_unchanged() {
        println!("{}", "Job records already up to date.".green());
        return Ok(());
    }
    for identity in &report.created {
        println!("  {} {}", "+".green(), identity);
    }
    for identity in &report.updated {
        println!("  {} {}", "~".yellow(), identity);
    }
    for identity in &report.removed {
        println!("  {} {}", "-".red(), identity);
    }
    Ok(())
}
