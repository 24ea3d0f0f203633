//! Drover Lua jobs
//!
//! Jobs authored as Lua scripts:
//! - Restricted sandbox with `jobs.register{...}` for explicit registration
//! - Parsing of registered job tables into metadata and variables
//! - Local and git script trees as job sources
//! - `LuaJob`, executing a registered job with the `log` and `job` modules

pub mod job;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;
pub mod source;

#[cfg(test)]
mod test_support;

pub use job::{LuaJob, LuaScript};
pub use module::{DroverModule, ModuleSet};
pub use modules::{JobModule, LogModule};
pub use parser::{Hooks, ParsedJob, parse_job};
pub use sandbox::create_sandbox;
pub use source::{LuaScriptSource, git_sources};
