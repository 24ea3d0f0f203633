//! Drover runner
//!
//! Everything between a run request and a finalized result:
//!
//! - Registry: discovery and sync of job records
//! - Dispatch: authorization, validation, approval and scheduling holds
//! - Runner: the execution lifecycle, time limits and singleton locking
//! - Repositories: persistence traits plus an in-memory store
//!
//! The orchestrator binary wires these to PostgreSQL and the HTTP API.

pub mod config;
pub mod dispatch;
pub mod lock;
pub mod pool;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use dispatch::{AllowAll, Authorizer, DispatchError, JobDispatcher};
pub use lock::{LockGuard, MemoryLock, SingletonLock};
pub use pool::{Executor, Task, WorkerPool};
pub use registry::{JobRegistry, RegistryError};
pub use repository::{
    MemoryStore, Outcome, RecordRepository, ResultRepository, ScheduleRepository, StoreError,
};
pub use runner::{Execution, JobRunner};
pub use scheduler::Scheduler;
pub use service::{BufferedSink, ResultService};
