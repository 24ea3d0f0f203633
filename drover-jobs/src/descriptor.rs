use drover_core::domain::job::{JobIdentity, JobMeta, SourceKind};
use drover_core::domain::variable::{VariableDefinition, VariableKind};
use std::sync::Arc;
use std::time::Duration;

use crate::job::Job;
use crate::schema::VariableSchema;

/// Builds a fresh job instance for one execution
pub type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Effective soft and hard time limits of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    pub soft: Duration,
    pub hard: Duration,
}

impl TimeLimits {
    pub fn from_secs(soft: u64, hard: u64) -> Self {
        Self {
            soft: Duration::from_secs(soft),
            hard: Duration::from_secs(hard),
        }
    }

    /// Limits declared by `meta`, falling back to `defaults`
    pub fn resolve(meta: &JobMeta, defaults: TimeLimits) -> Self {
        Self {
            soft: meta
                .soft_time_limit
                .map(Duration::from_secs)
                .unwrap_or(defaults.soft),
            hard: meta
                .time_limit
                .map(Duration::from_secs)
                .unwrap_or(defaults.hard),
        }
    }
}

/// Everything known about a discovered job
#[derive(Clone)]
pub struct JobDescriptor {
    pub identity: JobIdentity,
    pub meta: JobMeta,
    pub variables: Vec<VariableDefinition>,
    pub limits: TimeLimits,
    pub factory: JobFactory,
}

impl JobDescriptor {
    pub fn kind(&self) -> SourceKind {
        self.identity.kind()
    }

    pub fn instantiate(&self) -> Box<dyn Job> {
        (self.factory)()
    }

    pub fn schema(&self) -> VariableSchema<'_> {
        VariableSchema::new(&self.variables, &self.meta.field_order)
    }

    /// Queue runs are dispatched to, before any record override
    pub fn queue<'a>(&'a self, default_queue: &'a str) -> &'a str {
        self.meta.queue.as_deref().unwrap_or(default_queue)
    }

    pub fn dry_run_variable(&self) -> Option<&VariableDefinition> {
        self.variables
            .iter()
            .find(|v| matches!(v.kind, VariableKind::DryRun))
    }
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("identity", &self.identity)
            .field("meta", &self.meta)
            .field("variables", &self.variables)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
