//! Lua sandbox creation
//!
//! Job scripts are evaluated twice: once during discovery, to collect the
//! `jobs.register{...}` calls, and once per execution, with the `log` and
//! `job` modules installed. Both use the same restricted sandbox.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Registry key of the table collecting `jobs.register` calls
const REGISTERED_KEY: &str = "drover.registered_jobs";

/// LuaLS definitions of the `jobs` registration table
pub const STUBS: &str = r#"---@meta

---Job registration
---@class jobs
jobs = {}

---@alias VariableType "string"|"text"|"integer"|"boolean"|"choice"|"multi_choice"|"object"|"multi_object"|"file"|"json"|"ip_address"|"ip_address_with_mask"|"ip_network"|"dry_run"

---@class VariableDefinition
---@field name string
---@field type VariableType
---@field label? string
---@field description? string
---@field default? any
---@field required? boolean
---@field optional? boolean
---@field min_length? integer
---@field max_length? integer
---@field regex? string
---@field min_value? integer
---@field max_value? integer
---@field choices? (string|string[])[]
---@field model? string
---@field query? table
---@field display_field? string

---@class JobFailure
---@field message string
---@field trace? string
---@field soft boolean

---@class JobDefinition
---@field name string
---@field class? string
---@field description? string
---@field grouping? string
---@field approval_required? boolean
---@field sensitive_variables? boolean
---@field singleton? boolean
---@field hidden? boolean
---@field queue? string
---@field soft_time_limit? integer
---@field time_limit? integer
---@field field_order? string[]
---@field variables? VariableDefinition[]
---@field run fun(args: table): any
---@field before_start? fun(args: table)
---@field on_success? fun(result: any)
---@field on_failure? fun(failure: JobFailure)
---@field after_return? fun(status: "SUCCESS"|"FAILURE")

---Register a job defined by this script
---@param definition JobDefinition
---@return JobDefinition
function jobs.register(definition) end
"#;

/// Create a restricted Lua sandbox
///
/// Only the table, string, math and coroutine libraries are loaded. There
/// is no filesystem, network or process access and no way to load external
/// code.
///
/// # Example
/// ```
/// use drover_lua::sandbox::{create_sandbox, registered_jobs};
///
/// let lua = create_sandbox()?;
/// lua.load(r#"jobs.register { name = "Greet", run = function(args) end }"#)
///     .exec()?;
/// assert_eq!(registered_jobs(&lua)?.len(), 1);
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_jobs_module(&lua)?;

    Ok(lua)
}

/// Installs `jobs.register(definition)`, which records the definition and
/// returns it unchanged
fn register_jobs_module(lua: &Lua) -> LuaResult<()> {
    let registered = lua.create_table()?;
    lua.set_named_registry_value(REGISTERED_KEY, registered.clone())?;

    let jobs = lua.create_table()?;
    let register_fn = lua.create_function(move |_, definition: Table| {
        registered.raw_push(definition.clone())?;
        Ok(definition)
    })?;
    jobs.set("register", register_fn)?;

    lua.globals().set("jobs", jobs)?;
    Ok(())
}

/// Job tables registered so far, in registration order
pub fn registered_jobs(lua: &Lua) -> LuaResult<Vec<Table>> {
    let registered: Table = lua.named_registry_value(REGISTERED_KEY)?;
    registered.sequence_values::<Table>().collect()
}
