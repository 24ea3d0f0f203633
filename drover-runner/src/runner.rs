//! Job runner
//!
//! Drives one execution through its lifecycle:
//!
//! ```text
//! Created -> BeforeStart -> Running -> {Succeeded, Failed} -> Returned -> Closed
//! ```
//!
//! The singleton lock is taken before `BeforeStart` and released at close on
//! every path. The hook sequence runs in its own task so the hard time
//! limit can abort it and a panic cannot take the runner down with it.

use drover_core::domain::result::{ErrorKind, JobResult, JobStatus};
use drover_jobs::{Arguments, Job, JobContext, JobDescriptor, JobFailure, Phase};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};
use tracing::{error, info};
use uuid::Uuid;

use crate::lock::{LockGuard, SingletonLock};
use crate::repository::{Outcome, StoreError};
use crate::service::{BufferedSink, ResultService};

/// One enqueued execution
pub struct Execution {
    pub descriptor: Arc<JobDescriptor>,
    /// `PENDING` result created at dispatch
    pub result_id: Uuid,
    pub user: String,
    pub args: Arguments,
    /// Steal the singleton lock from a crashed holder
    pub force_release: bool,
}

pub struct JobRunner {
    results: Arc<ResultService>,
    lock: Arc<dyn SingletonLock>,
    flush_interval: Duration,
}

impl JobRunner {
    pub fn new(
        results: Arc<ResultService>,
        lock: Arc<dyn SingletonLock>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            results,
            lock,
            flush_interval,
        }
    }

    /// Runs the execution to completion and returns the finalized result
    pub async fn execute(&self, execution: Execution) -> Result<JobResult, StoreError> {
        let Execution {
            descriptor,
            result_id,
            user,
            args,
            force_release,
        } = execution;
        let identity = descriptor.identity.clone();
        let limits = descriptor.limits;
        let sanitizer = Arc::clone(self.results.sanitizer());

        let sink = Arc::new(BufferedSink::new(result_id, Arc::clone(&self.results)));
        let (soft_tx, soft_rx) = watch::channel(false);
        let ctx = JobContext::new(
            result_id,
            identity.clone(),
            user,
            sink.clone(),
            Arc::clone(&sanitizer),
            soft_rx,
        );

        let guard = if descriptor.meta.singleton {
            let acquired = LockGuard::acquire(
                Arc::clone(&self.lock),
                identity.lock_key(),
                limits.hard,
                force_release,
            )
            .await;
            match acquired {
                Ok(Some(guard)) => Some(guard),
                Ok(None) => {
                    ctx.log_failure(format!(
                        "Job {} is already running; singleton lock {} is held",
                        identity,
                        identity.lock_key()
                    ));
                    sink.flush().await?;
                    return self
                        .results
                        .finalize(result_id, Outcome::failure(ErrorKind::LockConflict, None))
                        .await;
                }
                Err(e) => {
                    return self
                        .abandon(result_id, &ctx, &sink, "Could not take the singleton lock", e)
                        .await;
                }
            }
        } else {
            None
        };

        if let Err(e) = self.results.mark_running(result_id).await {
            if let Some(guard) = guard {
                guard.release().await;
            }
            return self
                .abandon(result_id, &ctx, &sink, "Could not mark the job running", e)
                .await;
        }
        info!("Running job {} (result {})", identity, result_id);
        ctx.log_info(format!("Running job {}", identity));

        let flusher = sink.spawn_flusher(self.flush_interval);
        let soft_timer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                time::sleep(limits.soft).await;
                let _ = soft_tx.send(true);
                ctx.log_warning(format!("Soft time limit of {:?} exceeded", limits.soft));
            })
        };

        let lifecycle = tokio::spawn(drive(descriptor.instantiate(), ctx.clone(), args));
        let abort = lifecycle.abort_handle();
        let mut outcome = match time::timeout(limits.hard, lifecycle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_panic() => {
                let trace = panic_message(e.into_panic());
                ctx.log_error(format!("Job panicked: {}", trace));
                Outcome::failure(ErrorKind::HookError, Some(trace))
            }
            Ok(Err(e)) => {
                ctx.log_error(format!("Job task was cancelled: {}", e));
                Outcome::failure(ErrorKind::HookError, Some(e.to_string()))
            }
            Err(_) => {
                abort.abort();
                ctx.log_failure(format!("Hard time limit of {:?} exceeded", limits.hard));
                Outcome::failure(ErrorKind::TimeExceeded, None)
            }
        };
        soft_timer.abort();

        outcome.traceback = outcome.traceback.map(|trace| sanitizer.sanitize(&trace));
        if descriptor.meta.sensitive_variables {
            outcome.result = None;
        }

        match outcome.status {
            JobStatus::Success => ctx.log_success("Job completed successfully"),
            _ => ctx.log_failure(format!(
                "Job failed ({})",
                outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown")
            )),
        }

        flusher.stop().await;
        if let Err(e) = sink.flush().await {
            error!("Failed to write final logs of job result {}: {}", result_id, e);
        }
        if let Some(guard) = guard {
            guard.release().await;
        }

        self.results.finalize(result_id, outcome).await
    }

    /// Fails a result that never reached `RUNNING`
    async fn abandon(
        &self,
        result_id: Uuid,
        ctx: &JobContext,
        sink: &BufferedSink,
        what: &str,
        err: StoreError,
    ) -> Result<JobResult, StoreError> {
        error!("{} for job result {}: {}", what, result_id, err);
        ctx.log_failure(format!("{}: {}", what, err));
        if let Err(e) = sink.flush().await {
            error!("Failed to write logs of job result {}: {}", result_id, e);
        }

        let trace = self.results.sanitizer().sanitize(&err.to_string());
        self.results
            .finalize(
                result_id,
                Outcome::failure(ErrorKind::StorageError, Some(trace)),
            )
            .await
    }
}

/// Hook sequence of one job instance
async fn drive(job: Box<dyn Job>, ctx: JobContext, args: Arguments) -> Outcome {
    let mut returned = None;
    let mut failure = None;

    if let Some(hook) = job.as_before_start() {
        ctx.set_phase(Phase::BeforeStart);
        if let Err(e) = hook.before_start(&ctx, &args).await {
            ctx.log_error(format!("before_start failed: {:#}", e));
            failure = Some(JobFailure::from_error(&e));
        }
    }

    if failure.is_none() {
        ctx.set_phase(Phase::Run);
        match job.run(&ctx, &args).await {
            Ok(value) => {
                returned = value;
                failure = ctx.soft_failure().map(|reason| JobFailure::Soft { reason });
            }
            Err(e) => {
                ctx.log_error(format!("Job raised an error: {:#}", e));
                failure = Some(JobFailure::from_error(&e));
            }
        }
    }

    let status = match failure {
        None => JobStatus::Success,
        Some(_) => JobStatus::Failure,
    };

    // Post hooks only log their own errors
    match &failure {
        None => {
            if let Some(hook) = job.as_on_success() {
                ctx.set_phase(Phase::OnSuccess);
                if let Err(e) = hook.on_success(&ctx, returned.as_ref()).await {
                    ctx.log_error(format!("on_success failed: {:#}", e));
                }
            }
        }
        Some(failure) => {
            if let Some(hook) = job.as_on_failure() {
                ctx.set_phase(Phase::OnFailure);
                if let Err(e) = hook.on_failure(&ctx, failure).await {
                    ctx.log_error(format!("on_failure failed: {:#}", e));
                }
            }
        }
    }

    if let Some(hook) = job.as_after_return() {
        ctx.set_phase(Phase::AfterReturn);
        if let Err(e) = hook.after_return(&ctx, status).await {
            ctx.log_error(format!("after_return failed: {:#}", e));
        }
    }

    match failure {
        None => Outcome::success(returned),
        Some(JobFailure::Soft { .. }) => Outcome {
            result: returned,
            ..Outcome::failure(ErrorKind::SoftFailure, None)
        },
        Some(JobFailure::Error { trace, .. }) => Outcome::failure(ErrorKind::HookError, Some(trace)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}
