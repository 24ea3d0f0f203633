//! `job` module for Lua job scripts

use drover_jobs::JobContext;
use mlua::prelude::*;
use tokio::runtime::Handle;

use crate::module::DroverModule;

/// Exposes execution control to the script
///
/// Runs on a blocking thread; async context calls are driven through the
/// runtime `handle`.
pub struct JobModule {
    ctx: JobContext,
    handle: Handle,
}

impl JobModule {
    pub fn new(ctx: JobContext, handle: Handle) -> Self {
        Self { ctx, handle }
    }
}

/// LuaLS definitions of the `job` module
pub const STUBS: &str = r#"---@meta

---Current job execution
---@class job
---@field user string Principal that started the run
---@field result_id string
---@field identity string
job = {}

---Mark the run as failed without raising an error
---@param reason string
function job.fail(reason) end

---Whether the soft time limit has passed
---@return boolean
function job.soft_time_limit_exceeded() end

---@class JobFile
---@field id string
---@field name string
---@field size integer

---Attach an output file to the result
---@param name string
---@param content string
---@return JobFile
function job.create_file(name, content) end
"#;

impl DroverModule for JobModule {
    fn id(&self) -> &'static str {
        "job"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let job_table = lua.create_table()?;
        job_table.set("user", self.ctx.user())?;
        job_table.set("result_id", self.ctx.result_id().to_string())?;
        job_table.set("identity", self.ctx.identity().to_string())?;

        {
            let ctx = self.ctx.clone();
            job_table.set(
                "fail",
                lua.create_function(move |_, reason: String| {
                    ctx.fail(reason);
                    Ok(())
                })?,
            )?;
        }

        {
            let ctx = self.ctx.clone();
            job_table.set(
                "soft_time_limit_exceeded",
                lua.create_function(move |_, ()| Ok(ctx.soft_time_limit_exceeded()))?,
            )?;
        }

        {
            let ctx = self.ctx.clone();
            let handle = self.handle.clone();
            job_table.set(
                "create_file",
                lua.create_function(move |lua, (name, content): (String, LuaString)| {
                    let file = handle
                        .block_on(ctx.create_file(&name, content.as_bytes().to_vec()))
                        .map_err(|e| LuaError::RuntimeError(e.to_string()))?;
                    let out = lua.create_table()?;
                    out.set("id", file.id.to_string())?;
                    out.set("name", file.name)?;
                    out.set("size", file.size)?;
                    Ok(out)
                })?,
            )?;
        }

        lua.globals().set(self.id(), job_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, context};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fail_and_create_file() {
        let sink = Arc::new(RecordingSink::default());
        let (ctx, tx) = context(sink.clone());
        let handle = Handle::current();
        let lua_ctx = ctx.clone();

        let size = tokio::task::spawn_blocking(move || {
            let lua = Lua::new();
            JobModule::new(lua_ctx, handle).register(&lua).unwrap();
            lua.load(
                r#"
                job.fail("bad input")
                local f = job.create_file("report.txt", "hello")
                return f.size
            "#,
            )
            .eval::<u64>()
            .unwrap()
        })
        .await
        .unwrap();

        assert_eq!(size, 5);
        assert_eq!(ctx.soft_failure().as_deref(), Some("bad input"));
        assert_eq!(sink.files().len(), 1);

        tx.send(true).unwrap();
        let lua = Lua::new();
        JobModule::new(ctx, Handle::current())
            .register(&lua)
            .unwrap();
        let exceeded: bool = lua
            .load("return job.soft_time_limit_exceeded()")
            .eval()
            .unwrap();
        assert!(exceeded);
    }

    #[tokio::test]
    async fn test_create_file_error_is_raised() {
        let sink = Arc::new(RecordingSink::with_max_file_size(2));
        let (ctx, _tx) = context(sink);
        let handle = Handle::current();

        let result = tokio::task::spawn_blocking(move || {
            let lua = Lua::new();
            JobModule::new(ctx, handle).register(&lua).unwrap();
            lua.load(r#"job.create_file("big.txt", "too large")"#).exec()
        })
        .await
        .unwrap();

        assert!(result.unwrap_err().to_string().contains("byte limit"));
    }
}
