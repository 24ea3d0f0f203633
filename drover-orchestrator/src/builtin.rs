//! `drover_builtin` extension
//!
//! Jobs compiled into the service, registered as
//! `plugin.drover_builtin.examples.*`.

use async_trait::async_trait;
use drover_core::domain::job::{JobMeta, SourceKind};
use drover_core::domain::variable::VariableDefinition;
use drover_jobs::{Arguments, Job, JobClass, JobContext, JobSource, Registrar};
use serde_json::{Value, json};
use std::time::Duration;

pub struct BuiltinJobs;

impl JobSource for BuiltinJobs {
    fn kind(&self) -> SourceKind {
        SourceKind::Plugin
    }

    fn name(&self) -> &str {
        "drover_builtin"
    }

    fn group_base(&self) -> Option<&str> {
        Some("drover_builtin")
    }

    fn load(&self, registrar: &mut Registrar) -> anyhow::Result<()> {
        registrar.register::<Hello>("examples");
        registrar.register::<Echo>("examples");
        registrar.register::<Sleep>("examples");
        Ok(())
    }
}

/// Greets someone
#[derive(Default)]
pub struct Hello;

#[async_trait]
impl Job for Hello {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let greeting = format!("Hello, {}!", args.string("who").unwrap_or("world"));
        ctx.log_info(&greeting);
        Ok(Some(Value::String(greeting)))
    }
}

impl JobClass for Hello {
    const CLASS_NAME: &'static str = "Hello";

    fn meta() -> JobMeta {
        JobMeta::new("Hello").description("Logs a greeting and returns it")
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![
            VariableDefinition::string("who")
                .label("Who to greet")
                .default("world"),
        ]
    }
}

/// Echoes a message into the log and an output file, after approval
#[derive(Default)]
pub struct Echo;

#[async_trait]
impl Job for Echo {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let message = args.string("message").unwrap_or_default();
        if args.boolean("dryrun") == Some(true) {
            ctx.log_info("Dry run, nothing is changed");
        }
        ctx.log_info(message);
        let file = ctx.create_file("echo.txt", message).await?;
        Ok(Some(json!({ "file": file.id, "length": message.len() })))
    }
}

impl JobClass for Echo {
    const CLASS_NAME: &'static str = "Echo";

    fn meta() -> JobMeta {
        JobMeta::new("Echo")
            .description("Echoes a message; runs need a second person's approval")
            .approval_required()
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![
            VariableDefinition::text("message"),
            VariableDefinition::dry_run("dryrun"),
        ]
    }
}

/// Sleeps, one at a time, stopping early at the soft time limit
#[derive(Default)]
pub struct Sleep;

#[async_trait]
impl Job for Sleep {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let seconds = args.integer("seconds").unwrap_or(5).max(0) as u64;
        ctx.log_info(format!("Sleeping for {} second(s)", seconds));

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                ctx.log_success("Woke up");
                Ok(Some(json!(seconds)))
            }
            _ = ctx.soft_deadline() => {
                ctx.fail("Soft time limit reached before waking up");
                Ok(None)
            }
        }
    }
}

impl JobClass for Sleep {
    const CLASS_NAME: &'static str = "Sleep";

    fn meta() -> JobMeta {
        JobMeta::new("Sleep")
            .description("Holds the singleton lock while sleeping")
            .singleton()
            .time_limits(30, 60)
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![VariableDefinition::integer("seconds").default(5)]
    }
}
