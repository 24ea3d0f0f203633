//! `log` module for Lua job scripts
//!
//! Every level of the job log is exposed as `log.<level>(message, opts)`.
//! `opts` is an optional table with a `grouping` string.

use drover_core::domain::log::LogLevel;
use drover_jobs::{JobContext, LogOptions};
use mlua::prelude::*;

use crate::module::DroverModule;

const LEVELS: [LogLevel; 7] = [
    LogLevel::Debug,
    LogLevel::Info,
    LogLevel::Success,
    LogLevel::Warning,
    LogLevel::Failure,
    LogLevel::Error,
    LogLevel::Critical,
];

pub struct LogModule {
    ctx: JobContext,
}

impl LogModule {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

fn options(opts: Option<LuaTable>) -> LuaResult<LogOptions> {
    let mut options = LogOptions::default();
    if let Some(opts) = opts {
        if let Some(grouping) = opts.get::<Option<String>>("grouping")? {
            options = options.grouping(grouping);
        }
    }
    Ok(options)
}

impl DroverModule for LogModule {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for level in LEVELS {
            let ctx = self.ctx.clone();
            log_table.set(
                level.as_str(),
                lua.create_function(move |_, (msg, opts): (String, Option<LuaTable>)| {
                    ctx.log_with(level, msg, options(opts)?);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }
}

/// LuaLS definitions of the `log` module
pub fn stubs() -> String {
    let mut stubs = String::from(
        "---@meta\n\n---Job log\n---@class log\nlog = {}\n\n---@class LogOptions\n---@field grouping? string\n",
    );
    for level in LEVELS {
        stubs.push_str(&format!(
            "\n---Log a {level} message\n---@param msg string\n---@param opts? LogOptions\nfunction log.{level}(msg, opts) end\n",
            level = level.as_str()
        ));
    }
    stubs
}
