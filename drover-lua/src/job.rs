//! Execution of Lua-defined jobs
//!
//! A `LuaJob` evaluates its script once per execution in a fresh sandbox,
//! on the blocking pool, and keeps that state for the lifecycle hooks of
//! the same execution. Dropping an in-flight call (hard time limit) raises
//! a cancellation flag that an instruction hook turns into a Lua error.

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use drover_core::domain::result::JobStatus;
use drover_jobs::{
    AfterReturn, ArgValue, Arguments, BeforeStart, Job, JobContext, JobFailure, OnFailure,
    OnSuccess,
};
use mlua::{Function, HookTriggers, Lua, LuaSerdeExt, SerializeOptions, Table, VmState};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

use crate::module::ModuleSet;
use crate::modules::{JobModule, LogModule};
use crate::parser::Hooks;
use crate::sandbox::{create_sandbox, registered_jobs};

/// Instructions between two cancellation checks
const CANCEL_CHECK_INTERVAL: u32 = 1000;

/// Source text of one job script
#[derive(Debug)]
pub struct LuaScript {
    pub chunk_name: String,
    pub source: String,
}

struct LuaRuntime {
    lua: Lua,
    job: Table,
}

impl LuaRuntime {
    fn load(
        script: &LuaScript,
        index: usize,
        ctx: JobContext,
        handle: Handle,
        cancelled: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let lua = create_sandbox().context("Failed to create Lua sandbox")?;

        ModuleSet::new()
            .with(LogModule::new(ctx.clone()))?
            .with(JobModule::new(ctx, handle))?
            .install(&lua)?;

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(CANCEL_CHECK_INTERVAL),
            move |_lua, _debug| {
                if cancelled.load(Ordering::Relaxed) {
                    Err(mlua::Error::RuntimeError("execution cancelled".to_string()))
                } else {
                    Ok(VmState::Continue)
                }
            },
        )
        .context("Failed to install cancellation hook")?;

        lua.load(script.source.as_str())
            .set_name(script.chunk_name.as_str())
            .exec()
            .with_context(|| format!("Failed to evaluate {}", script.chunk_name))?;

        let job = registered_jobs(&lua)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow!("{} no longer registers job #{}", script.chunk_name, index + 1))?;

        Ok(Self { lua, job })
    }

    fn call(&self, function: &str, arg: &Value) -> anyhow::Result<Option<Value>> {
        let f: Function = self
            .job
            .get(function)
            .with_context(|| format!("Job has no '{}' function", function))?;

        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let arg = self.lua.to_value_with(arg, options)?;

        match f.call::<mlua::Value>(arg)? {
            mlua::Value::Nil => Ok(None),
            value => Ok(Some(
                self.lua
                    .from_value(value)
                    .with_context(|| format!("'{}' returned a value that is not JSON", function))?,
            )),
        }
    }
}

/// Raises the flag unless disarmed before being dropped
struct CancelOnDrop(Option<Arc<AtomicBool>>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

pub struct LuaJob {
    script: Arc<LuaScript>,
    index: usize,
    hooks: Hooks,
    cancelled: Arc<AtomicBool>,
    runtime: Arc<Mutex<Option<LuaRuntime>>>,
}

impl LuaJob {
    /// `index` is the position of the job among the script's registrations
    pub fn new(script: Arc<LuaScript>, index: usize, hooks: Hooks) -> Self {
        Self {
            script,
            index,
            hooks,
            cancelled: Arc::new(AtomicBool::new(false)),
            runtime: Arc::new(Mutex::new(None)),
        }
    }

    async fn call(
        &self,
        ctx: &JobContext,
        function: &'static str,
        arg: Value,
    ) -> anyhow::Result<Option<Value>> {
        let ctx = ctx.clone();
        let script = self.script.clone();
        let index = self.index;
        let runtime = self.runtime.clone();
        let cancelled = self.cancelled.clone();
        let handle = Handle::current();
        let guard = CancelOnDrop(Some(self.cancelled.clone()));

        let task = tokio::task::spawn_blocking(move || {
            let mut slot = runtime
                .lock()
                .map_err(|_| anyhow!("Lua state was poisoned by an earlier panic"))?;
            if slot.is_none() {
                *slot = Some(LuaRuntime::load(&script, index, ctx, handle, cancelled)?);
            }
            let Some(rt) = slot.as_ref() else {
                bail!("Lua state is not initialized");
            };
            rt.call(function, &arg)
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow!("Lua task failed: {}", e)),
        };
        guard.disarm();
        outcome
    }
}

/// Arguments as seen from Lua: objects become `{ model, id, display }`
fn lua_arguments(args: &Arguments) -> Value {
    let object = |obj: &drover_core::domain::log::ObjectRef| {
        json!({ "model": obj.model, "id": obj.id.to_string(), "display": obj.display })
    };

    let mut out = serde_json::Map::new();
    for (name, value) in args.iter() {
        let converted = match value {
            ArgValue::Object(obj) => object(obj),
            ArgValue::Objects(objs) => Value::Array(objs.iter().map(object).collect()),
            ArgValue::File(file) => json!({
                "name": file.name,
                "content": String::from_utf8_lossy(&file.content),
            }),
            ArgValue::Json(value) => value.clone(),
            other => other.to_raw(),
        };
        out.insert(name.to_string(), converted);
    }
    Value::Object(out)
}

#[async_trait]
impl Job for LuaJob {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        self.call(ctx, "run", lua_arguments(args)).await
    }

    fn as_before_start(&self) -> Option<&dyn BeforeStart> {
        self.hooks.before_start.then_some(self as &dyn BeforeStart)
    }

    fn as_on_success(&self) -> Option<&dyn OnSuccess> {
        self.hooks.on_success.then_some(self as &dyn OnSuccess)
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        self.hooks.on_failure.then_some(self as &dyn OnFailure)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        self.hooks.after_return.then_some(self as &dyn AfterReturn)
    }
}

#[async_trait]
impl BeforeStart for LuaJob {
    async fn before_start(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<()> {
        self.call(ctx, "before_start", lua_arguments(args)).await?;
        Ok(())
    }
}

#[async_trait]
impl OnSuccess for LuaJob {
    async fn on_success(&self, ctx: &JobContext, result: Option<&Value>) -> anyhow::Result<()> {
        self.call(ctx, "on_success", result.cloned().unwrap_or(Value::Null))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OnFailure for LuaJob {
    async fn on_failure(&self, ctx: &JobContext, failure: &JobFailure) -> anyhow::Result<()> {
        let arg = json!({
            "message": failure.message(),
            "trace": failure.trace(),
            "soft": matches!(failure, JobFailure::Soft { .. }),
        });
        self.call(ctx, "on_failure", arg).await?;
        Ok(())
    }
}

#[async_trait]
impl AfterReturn for LuaJob {
    async fn after_return(&self, ctx: &JobContext, status: JobStatus) -> anyhow::Result<()> {
        self.call(ctx, "after_return", Value::from(status.as_str()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_job;
    use crate::test_support::{RecordingSink, context};
    use drover_core::domain::log::LogLevel;
    use std::time::Duration;

    fn load(source: &str) -> LuaJob {
        let script = Arc::new(LuaScript {
            chunk_name: "test.lua".to_string(),
            source: source.to_string(),
        });
        let lua = create_sandbox().unwrap();
        lua.load(source).exec().unwrap();
        let table = registered_jobs(&lua).unwrap().remove(0);
        let parsed = parse_job(&lua, &table).unwrap();
        LuaJob::new(script, 0, parsed.hooks)
    }

    #[tokio::test]
    async fn test_run_and_hooks_share_state() {
        let job = load(
            r#"
            local greeted

            jobs.register {
                name = "Greet",
                run = function(args)
                    greeted = args.who
                    log.info("Hello, " .. args.who .. "!")
                    return { greeted = args.who }
                end,
                on_success = function(result)
                    log.success("greeted " .. result.greeted)
                end,
                after_return = function(status)
                    log.debug(greeted .. " " .. status)
                end,
            }
        "#,
        );
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink.clone());

        let mut args = Arguments::new();
        args.insert("who", ArgValue::String("world".into()));

        assert!(job.as_before_start().is_none());
        let result = job.run(&ctx, &args).await.unwrap();
        assert_eq!(result, Some(json!({"greeted": "world"})));

        job.as_on_success()
            .unwrap()
            .on_success(&ctx, result.as_ref())
            .await
            .unwrap();
        job.as_after_return()
            .unwrap()
            .after_return(&ctx, JobStatus::Success)
            .await
            .unwrap();

        let messages: Vec<String> = sink.records().into_iter().map(|r| r.message).collect();
        assert_eq!(
            messages,
            vec!["Hello, world!", "greeted world", "world SUCCESS"]
        );
    }

    #[tokio::test]
    async fn test_lua_error_becomes_job_error() {
        let job = load(
            r#"
            jobs.register {
                name = "Broken",
                run = function(args) error("device unreachable") end,
            }
        "#,
        );
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink);

        let err = job.run(&ctx, &Arguments::new()).await.unwrap_err();
        assert!(format!("{:?}", err).contains("device unreachable"));
    }

    #[tokio::test]
    async fn test_soft_failure_from_lua() {
        let job = load(
            r#"
            jobs.register {
                name = "Validate",
                run = function(args)
                    job.fail("config drift detected")
                    return 3
                end,
            }
        "#,
        );
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink.clone());

        let result = job.run(&ctx, &Arguments::new()).await.unwrap();
        assert_eq!(result, Some(json!(3)));
        assert_eq!(ctx.soft_failure().as_deref(), Some("config drift detected"));
        assert_eq!(sink.records()[0].level, LogLevel::Failure);
    }

    #[tokio::test]
    async fn test_dropped_call_cancels_script() {
        let job = load(
            r#"
            jobs.register {
                name = "Spin",
                run = function(args) while true do end end,
            }
        "#,
        );
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            job.run(&ctx, &Arguments::new()),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(job.cancelled.load(Ordering::Relaxed));

        // the blocking thread gives the state back once the hook fires
        let released = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if job.runtime.try_lock().is_ok() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }
}
