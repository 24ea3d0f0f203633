use async_trait::async_trait;
use drover_core::domain::job::JobMeta;
use drover_core::domain::result::JobStatus;
use drover_core::domain::variable::VariableDefinition;
use serde_json::Value;

use crate::arguments::Arguments;
use crate::context::JobContext;

/// A unit of work runnable by Drover.
///
/// `run` is the only required method. Lifecycle hooks are optional
/// capabilities: a job opts in by implementing the hook trait and returning
/// itself from the matching `as_*` method.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use drover_core::domain::job::JobMeta;
/// use drover_core::domain::variable::VariableDefinition;
/// use drover_jobs::{Arguments, BeforeStart, Job, JobClass, JobContext};
/// use serde_json::Value;
///
/// #[derive(Default)]
/// struct Greet;
///
/// #[async_trait]
/// impl Job for Greet {
///     async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
///         let who = args.string("who").unwrap_or("world");
///         ctx.log_info(format!("Hello, {}!", who));
///         Ok(Some(Value::from(who)))
///     }
///
///     fn as_before_start(&self) -> Option<&dyn BeforeStart> {
///         Some(self)
///     }
/// }
///
/// #[async_trait]
/// impl BeforeStart for Greet {
///     async fn before_start(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<()> {
///         ctx.log_debug("warming up");
///         Ok(())
///     }
/// }
///
/// impl JobClass for Greet {
///     const CLASS_NAME: &'static str = "Greet";
///
///     fn meta() -> JobMeta {
///         JobMeta::new("Greet").description("Says hello")
///     }
///
///     fn variables() -> Vec<VariableDefinition> {
///         vec![VariableDefinition::string("who").default("world")]
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// Performs the work.
    ///
    /// `args` holds exactly the job's validated variables by name. The
    /// returned value is recorded on the result unless the job's variables
    /// are sensitive.
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>>;

    fn as_before_start(&self) -> Option<&dyn BeforeStart> {
        None
    }

    fn as_on_success(&self) -> Option<&dyn OnSuccess> {
        None
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        None
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        None
    }
}

/// Runs before the work function; an error skips `run` entirely.
#[async_trait]
pub trait BeforeStart: Send + Sync {
    async fn before_start(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OnSuccess: Send + Sync {
    async fn on_success(&self, ctx: &JobContext, result: Option<&Value>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OnFailure: Send + Sync {
    async fn on_failure(&self, ctx: &JobContext, failure: &JobFailure) -> anyhow::Result<()>;
}

/// Runs after the outcome hooks, whatever the outcome.
#[async_trait]
pub trait AfterReturn: Send + Sync {
    async fn after_return(&self, ctx: &JobContext, status: JobStatus) -> anyhow::Result<()>;
}

/// Why an execution failed, as seen by `on_failure`
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// A hook or the work function returned an error
    Error { message: String, trace: String },
    /// The work function called `fail()`
    Soft { reason: String },
}

impl JobFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        JobFailure::Error {
            message: err.to_string(),
            trace: format!("{:?}", err),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobFailure::Error { message, .. } => message,
            JobFailure::Soft { reason } => reason,
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            JobFailure::Error { trace, .. } => Some(trace),
            JobFailure::Soft { .. } => None,
        }
    }
}

/// A compiled-in job type that can be registered by type.
///
/// Each execution gets a fresh `Default` instance.
pub trait JobClass: Job + Default + 'static {
    /// Class name; the last segment of the job identity
    const CLASS_NAME: &'static str;

    fn meta() -> JobMeta;

    fn variables() -> Vec<VariableDefinition> {
        Vec::new()
    }
}
