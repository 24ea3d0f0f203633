//! Modules installed into the execution sandbox

pub mod job;
pub mod log;

pub use job::JobModule;
pub use log::LogModule;

/// LuaLS definition files for every global a job script sees, keyed by
/// global name: the `jobs` registration table and each execution module
pub fn stub_files() -> Vec<(&'static str, String)> {
    vec![
        ("jobs", crate::sandbox::STUBS.to_string()),
        ("log", log::stubs()),
        ("job", job::STUBS.to_string()),
    ]
}
