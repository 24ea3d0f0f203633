//! Job result command handlers
//!
//! Results, their logs and output files.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use drover_client::OrchestratorClient;
use drover_core::domain::job::JobIdentity;
use drover_core::domain::log::{JobLogEntry, LogLevel};
use drover_core::domain::result::{JobResult, JobStatus};
use drover_core::dto::result::ResultQuery;
use std::path::PathBuf;

use crate::config::Config;
use crate::id_resolver::resolve_result_id;
use crate::types::IdOrPrefix;

/// Job result subcommands
#[derive(Subcommand)]
pub enum ResultCommands {
    /// List job results, newest first
    List {
        /// Only results of this job
        #[arg(long)]
        job: Option<JobIdentity>,

        /// PENDING, RUNNING, SUCCESS or FAILURE
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a job result
    Show {
        /// Result ID or unambiguous prefix
        id: String,
    },
    /// Print a job result's log
    Logs { id: String },
    /// List a job result's output files
    Files { id: String },
    /// Download an output file
    Download {
        id: String,

        /// File ID or unambiguous prefix
        file: String,

        /// Destination; defaults to the file's name in the current directory
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete a job result with its logs and files
    Delete { id: String },
}

/// Handle job result commands
pub async fn handle_result_command(command: ResultCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ResultCommands::List { job, status, limit } => {
            let query = ResultQuery {
                job,
                status,
                limit: Some(limit),
            };
            list_results(&client, &query).await
        }
        ResultCommands::Show { id } => {
            let id = resolve_result_id(&client, &IdOrPrefix::parse(&id)).await?;
            print_result_details(&client.get_result(id).await?);
            Ok(())
        }
        ResultCommands::Logs { id } => {
            let id = resolve_result_id(&client, &IdOrPrefix::parse(&id)).await?;
            let logs = client.result_logs(id).await?;
            if logs.is_empty() {
                println!("{}", "No logs found for this job result.".yellow());
            } else {
                println!("{}", format!("Logs for job result {}:", id).bold());
                print_logs(&logs);
            }
            Ok(())
        }
        ResultCommands::Files { id } => list_files(&client, &id).await,
        ResultCommands::Download { id, file, output } => {
            download_file(&client, &id, &file, output).await
        }
        ResultCommands::Delete { id } => {
            let id = resolve_result_id(&client, &IdOrPrefix::parse(&id)).await?;
            client.delete_result(id).await?;
            println!("{} Deleted job result {}", "✓".green(), id);
            Ok(())
        }
    }
}

async fn list_results(client: &OrchestratorClient, query: &ResultQuery) -> Result<()> {
    let results = client.list_results(query).await?;

    if results.is_empty() {
        println!("{}", "No job results found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} job result(s):", results.len()).bold());
    println!();
    for result in results {
        println!(
            "  {} {} {} {}",
            "▸".cyan(),
            result.id.to_string().dimmed(),
            colorize_status(&result.status),
            result.job_name.bold()
        );
        println!(
            "    by {} at {}",
            result.user,
            result
                .created_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
    }

    Ok(())
}

async fn list_files(client: &OrchestratorClient, id: &str) -> Result<()> {
    let id = resolve_result_id(client, &IdOrPrefix::parse(id)).await?;
    let files = client.result_files(id).await?;

    if files.is_empty() {
        println!("{}", "No files for this job result.".yellow());
        return Ok(());
    }

    for file in files {
        println!(
            "  {} {} {} ({} bytes)",
            "▸".cyan(),
            file.id.to_string().dimmed(),
            file.name.bold(),
            file.size
        );
    }
    Ok(())
}

async fn download_file(
    client: &OrchestratorClient,
    id: &str,
    file: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let id = resolve_result_id(client, &IdOrPrefix::parse(id)).await?;
    let wanted = IdOrPrefix::parse(file);
    let files = client.result_files(id).await?;
    let matches: Vec<_> = files.iter().filter(|f| wanted.matches(&f.id)).collect();
    let file = match matches.as_slice() {
        [file] => *file,
        [] => anyhow::bail!("No file found with ID starting with '{}'", wanted),
        _ => anyhow::bail!("Ambiguous file prefix '{}'", wanted),
    };

    let content = client.download_file(id, file.id).await?;
    let path = output.unwrap_or_else(|| PathBuf::from(&file.name));
    tokio::fs::write(&path, &content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} Wrote {} bytes to {}",
        "✓".green(),
        content.len(),
        path.display()
    );
    Ok(())
}

/// Print detailed job result information
pub fn print_result_details(result: &JobResult) {
    println!("{}", "Job Result:".bold());
    println!("  ID:        {}", result.id.to_string().cyan());
    println!("  Job:       {}", result.job_identity);
    println!("  Status:    {}", colorize_status(&result.status));
    println!("  User:      {}", result.user);
    println!("  Queue:     {}", result.task_queue);
    println!(
        "  Created:   {}",
        result.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = result.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = result.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = result.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:  {}ms", duration.num_milliseconds());
        }
    }

    if let Some(kind) = &result.error_kind {
        println!("  Error:     {}", kind.as_str().red());
    }

    if let Some(kwargs) = &result.task_kwargs {
        println!("\n{}", "Arguments:".bold());
        print_json(kwargs);
    }

    if let Some(value) = &result.result {
        println!("\n{}", "Result:".bold());
        print_json(value);
    }

    if let Some(traceback) = &result.traceback {
        println!("\n{}", "Traceback:".bold());
        println!("{}", traceback.red());
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", value),
    }
}

/// Print log entries between rules
pub fn print_logs(logs: &[JobLogEntry]) {
    println!("{}", "─".repeat(80).dimmed());
    for log in logs {
        print_log_entry(log);
    }
    println!("{}", "─".repeat(80).dimmed());
}

fn print_log_entry(log: &JobLogEntry) {
    let level_str = log.level.as_str().to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Success => level_str.green(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Failure | LogLevel::Error => level_str.red(),
        LogLevel::Critical => level_str.red().bold(),
    };

    let object = log
        .object
        .as_ref()
        .map(|o| format!(" ({} {})", o.model, o.display).dimmed().to_string())
        .unwrap_or_default();

    println!(
        "{} [{}] {}{}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message,
        object
    );
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Success => status_str.green(),
        JobStatus::Failure => status_str.red(),
    }
}
