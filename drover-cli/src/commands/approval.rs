//! Approval command handlers
//!
//! Held runs waiting for approval or a later start.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use drover_client::OrchestratorClient;
use drover_core::domain::schedule::ScheduledJob;

use crate::config::Config;
use crate::id_resolver::resolve_scheduled_id;
use crate::types::IdOrPrefix;

/// Approval subcommands
#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List held runs
    List {
        /// Only runs still waiting for approval
        #[arg(long)]
        pending: bool,
    },
    /// Show a held run
    Show {
        /// Scheduled job ID or unambiguous prefix
        id: String,
    },
    /// Approve a held run as the current user
    Approve { id: String },
    /// Deny a held run (or withdraw your own request)
    Deny { id: String },
}

/// Handle approval commands
pub async fn handle_approval_command(command: ApprovalCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ApprovalCommands::List { pending } => list_scheduled(&client, pending).await,
        ApprovalCommands::Show { id } => {
            let id = resolve_scheduled_id(&client, &IdOrPrefix::parse(&id)).await?;
            print_scheduled_details(&client.get_scheduled(id).await?);
            Ok(())
        }
        ApprovalCommands::Approve { id } => {
            let id = resolve_scheduled_id(&client, &IdOrPrefix::parse(&id)).await?;
            let outcome = client.approve(id).await?;
            println!(
                "{} Approved {} ({})",
                "✓".green(),
                outcome.scheduled_job.name.bold(),
                outcome.scheduled_job.job_identity
            );
            if let Some(result_id) = outcome.result_id {
                println!("  Enqueued job result {}", result_id.to_string().cyan());
            }
            Ok(())
        }
        ApprovalCommands::Deny { id } => {
            let id = resolve_scheduled_id(&client, &IdOrPrefix::parse(&id)).await?;
            let denied = client.deny(id).await?;
            println!(
                "{} Denied {} ({})",
                "✓".green(),
                denied.name.bold(),
                denied.job_identity
            );
            Ok(())
        }
    }
}

async fn list_scheduled(client: &OrchestratorClient, pending_only: bool) -> Result<()> {
    let scheduled: Vec<ScheduledJob> = client
        .list_scheduled()
        .await?
        .into_iter()
        .filter(|job| !pending_only || job.is_awaiting_approval())
        .collect();

    if scheduled.is_empty() {
        println!("{}", "No scheduled jobs found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} scheduled job(s):", scheduled.len()).bold()
    );
    println!();
    for job in scheduled {
        let state = if job.is_awaiting_approval() {
            "awaiting approval".yellow()
        } else if job.enabled {
            "approved".green()
        } else {
            "disabled".dimmed()
        };
        println!(
            "  {} {} {} [{}]",
            "▸".cyan(),
            job.id.to_string().dimmed(),
            job.name.bold(),
            state
        );
        println!(
            "    {} by {}, {} from {}",
            job.job_identity,
            job.user,
            job.interval,
            job.start_time.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn print_scheduled_details(job: &ScheduledJob) {
    println!("{}", "Scheduled Job:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Name:      {}", job.name);
    println!("  Job:       {}", job.job_identity);
    println!("  Requested: {} at {}", job.user, job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Interval:  {}", job.interval);
    println!("  Start:     {}", job.start_time.format("%Y-%m-%d %H:%M:%S"));
    println!("  Runs:      {}", job.total_run_count);
    if let Some(last) = job.last_run_at {
        println!("  Last run:  {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    match (&job.approved_by, job.approved_at) {
        (Some(by), Some(at)) => {
            println!("  Approved:  by {} at {}", by, at.format("%Y-%m-%d %H:%M:%S"))
        }
        _ if job.approval_required => println!("  Approved:  {}", "no".yellow()),
        _ => {}
    }

    if let Ok(pretty) = serde_json::to_string_pretty(&job.kwargs) {
        println!("\n{}", "Arguments:".bold());
        println!("{}", pretty);
    }
}
