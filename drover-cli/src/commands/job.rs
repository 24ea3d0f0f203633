//! Job command handlers
//!
//! Handles the job catalog: listing, details, enabling, forms and runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use drover_client::OrchestratorClient;
use drover_core::domain::job::JobIdentity;
use drover_core::domain::schedule::ScheduleInterval;
use drover_core::dto::job::{JobDetail, JobSummary, RunJob, RunJobResponse, ScheduleRequest, UpdateJobRecord};
use serde_json::{Map, Value};
use std::time::Duration;

use super::result::{print_logs, print_result_details};
use crate::config::Config;
use crate::types::parse_var;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Include hidden jobs
        #[arg(long)]
        all: bool,
    },
    /// Show a job with its variables
    Show {
        /// Job identity, e.g. plugin.drover_builtin.examples.Hello
        identity: JobIdentity,
    },
    /// Allow the job to run
    Enable { identity: JobIdentity },
    /// Stop the job from running
    Disable { identity: JobIdentity },
    /// Print the job's parameter schema as JSON
    Form { identity: JobIdentity },
    /// Request a run
    Run {
        identity: JobIdentity,

        /// Variable value as key=value (JSON values are parsed)
        #[arg(long = "var", short = 'v', value_parser = parse_var_arg)]
        vars: Vec<(String, Value)>,

        /// Hold the run: immediately, future, hourly, daily or weekly
        #[arg(long)]
        schedule: Option<ScheduleInterval>,

        /// First start time (RFC 3339) for a scheduled run
        #[arg(long, requires = "schedule")]
        start: Option<DateTime<Utc>>,

        /// Name of the scheduled entry
        #[arg(long, requires = "schedule")]
        name: Option<String>,

        /// Steal the singleton lock from a crashed holder
        #[arg(long)]
        force_release: bool,

        /// Wait for the run to finish and print its logs
        #[arg(long, short)]
        wait: bool,

        /// Seconds to wait with --wait
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

fn parse_var_arg(raw: &str) -> Result<(String, Value), String> {
    parse_var(raw).map_err(|e| e.to_string())
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::List { all } => list_jobs(&client, all).await,
        JobCommands::Show { identity } => show_job(&client, &identity).await,
        JobCommands::Enable { identity } => set_enabled(&client, &identity, true).await,
        JobCommands::Disable { identity } => set_enabled(&client, &identity, false).await,
        JobCommands::Form { identity } => {
            let form = client.job_form(&identity).await?;
            println!("{}", serde_json::to_string_pretty(&form)?);
            Ok(())
        }
        JobCommands::Run {
            identity,
            vars,
            schedule,
            start,
            name,
            force_release,
            wait,
            timeout,
        } => {
            let request = RunJob {
                data: vars.into_iter().collect::<Map<String, Value>>(),
                schedule: schedule.map(|interval| ScheduleRequest {
                    interval,
                    start_time: start,
                    name,
                }),
                force_release,
            };
            run_job(&client, &identity, &request, wait.then(|| Duration::from_secs(timeout))).await
        }
    }
}

/// List jobs grouped as the service returns them
async fn list_jobs(client: &OrchestratorClient, include_hidden: bool) -> Result<()> {
    let jobs = client.list_jobs(include_hidden).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} job(s):", jobs.len()).bold());
    let mut grouping = None;
    for job in &jobs {
        if grouping != Some(&job.grouping) {
            println!();
            println!("{}", job.grouping.bold());
            grouping = Some(&job.grouping);
        }
        print_job_summary(job);
    }

    Ok(())
}

async fn show_job(client: &OrchestratorClient, identity: &JobIdentity) -> Result<()> {
    let job = client.get_job(identity).await?;
    print_job_details(&job);
    Ok(())
}

async fn set_enabled(client: &OrchestratorClient, identity: &JobIdentity, enabled: bool) -> Result<()> {
    let update = UpdateJobRecord {
        enabled: Some(enabled),
        ..Default::default()
    };
    let job = client.update_job(identity, &update).await?;

    let state = if job.enabled { "enabled".green() } else { "disabled".yellow() };
    println!("{} {} {}", "✓".green(), job.identity, state);
    Ok(())
}

async fn run_job(
    client: &OrchestratorClient,
    identity: &JobIdentity,
    request: &RunJob,
    wait: Option<Duration>,
) -> Result<()> {
    let response = match client.run_job(identity, request).await {
        Ok(response) => response,
        Err(e) => {
            for field in e.fields() {
                eprintln!("  {} {}", "✗".red(), field);
            }
            return Err(e).with_context(|| format!("Failed to run {}", identity));
        }
    };

    match response {
        RunJobResponse::Enqueued { result_id } => {
            println!("{} Enqueued job result {}", "✓".green(), result_id.to_string().cyan());

            if let Some(timeout) = wait {
                let result = client
                    .wait_for_result(result_id, Duration::from_millis(500), timeout)
                    .await?;
                println!();
                print_logs(&client.result_logs(result_id).await?);
                println!();
                print_result_details(&result);
            }
        }
        RunJobResponse::Scheduled {
            scheduled_job_id,
            approval_required,
        } => {
            println!(
                "{} Held as scheduled job {}",
                "✓".green(),
                scheduled_job_id.to_string().cyan()
            );
            if approval_required {
                println!("{}", "  Waiting for approval by another user".yellow());
            }
        }
    }

    Ok(())
}

fn print_job_summary(job: &JobSummary) {
    let state = if job.enabled {
        "enabled".green()
    } else {
        "disabled".dimmed()
    };

    let mut flags = Vec::new();
    if job.approval_required {
        flags.push("approval");
    }
    if job.singleton {
        flags.push("singleton");
    }
    if job.sensitive_variables {
        flags.push("sensitive");
    }
    if !job.installed {
        flags.push("not installed");
    }

    println!("  {} {} [{}]", "▸".cyan(), job.name.bold(), state);
    println!("    {}", job.identity.to_string().dimmed());
    if let Some(description) = &job.description {
        println!("    {}", description);
    }
    if !flags.is_empty() {
        println!("    {}", flags.join(", ").yellow());
    }
}

fn print_job_details(job: &JobDetail) {
    let summary = &job.summary;

    println!("{}", "Job Details:".bold());
    println!("  Identity:    {}", summary.identity.to_string().cyan());
    println!("  Name:        {}", summary.name);
    println!("  Grouping:    {}", summary.grouping);
    if let Some(description) = &summary.description {
        println!("  Description: {}", description);
    }
    println!("  Enabled:     {}", summary.enabled);
    println!("  Queue:       {}", summary.queue);
    println!("  Approval:    {}", summary.approval_required);
    println!("  Singleton:   {}", summary.singleton);
    println!(
        "  Time limits: {}s soft, {}s hard",
        job.soft_time_limit, job.time_limit
    );

    if !job.variables.is_empty() {
        println!("\n{}", "Variables:".bold());
        for variable in &job.variables {
            let kind = serde_json::to_value(&variable.kind)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            let required = if variable.required { " (required)" } else { "" };
            print!("  {} {}{}", variable.name.cyan(), kind.dimmed(), required);
            if let Some(default) = &variable.default {
                print!(" = {}", default);
            }
            println!();
            if let Some(description) = &variable.description {
                println!("      {}", description.dimmed());
            }
        }
    }
}
