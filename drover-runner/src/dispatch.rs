//! Job dispatch and approval
//!
//! Turns a run request into either an enqueued execution or a held
//! [`ScheduledJob`]. A request is held when the job requires approval (and
//! the submission is not an immediate dry run) or when it is deferred or
//! recurring. Held argument sets are persisted, which is refused for jobs
//! with sensitive variables or uploaded files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::job::{JobIdentity, JobRecord};
use drover_core::domain::schedule::{ScheduleInterval, ScheduledJob};
use drover_core::dto::job::{FieldError, RunJob, RunJobResponse};
use drover_core::dto::schedule::ApprovalOutcome;
use drover_jobs::{Arguments, JobDescriptor, ObjectLookup};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::pool::Executor;
use crate::registry::{JobRegistry, RegistryError};
use crate::repository::{ScheduleRepository, StoreError};
use crate::runner::{Execution, JobRunner};
use crate::service::ResultService;

/// Permission checks of the surrounding application
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_run(&self, user: &str, identity: &JobIdentity) -> bool;

    async fn can_approve(&self, user: &str, identity: &JobIdentity) -> bool;
}

/// Grants everything to everyone
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn can_run(&self, _user: &str, _identity: &JobIdentity) -> bool {
        true
    }

    async fn can_approve(&self, _user: &str, _identity: &JobIdentity) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job {0} not found")]
    JobNotFound(JobIdentity),

    #[error("scheduled job {0} not found")]
    ScheduledJobNotFound(Uuid),

    #[error("job {0} is disabled")]
    Disabled(JobIdentity),

    #[error("{0}")]
    Forbidden(String),

    #[error("invalid job data: {}", format_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(identity) => DispatchError::JobNotFound(identity),
            RegistryError::Disabled(identity) => DispatchError::Disabled(identity),
            RegistryError::Store(e) => DispatchError::Store(e),
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct JobDispatcher {
    registry: Arc<JobRegistry>,
    results: Arc<ResultService>,
    schedules: Arc<dyn ScheduleRepository>,
    runner: Arc<JobRunner>,
    executor: Arc<dyn Executor>,
    lookup: Arc<dyn ObjectLookup>,
    authorizer: Arc<dyn Authorizer>,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        results: Arc<ResultService>,
        schedules: Arc<dyn ScheduleRepository>,
        runner: Arc<JobRunner>,
        executor: Arc<dyn Executor>,
        lookup: Arc<dyn ObjectLookup>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            registry,
            results,
            schedules,
            runner,
            executor,
            lookup,
            authorizer,
        }
    }

    /// Validates a run request and enqueues or holds it
    pub async fn submit(
        &self,
        identity: &JobIdentity,
        user: &str,
        request: RunJob,
    ) -> Result<RunJobResponse, DispatchError> {
        let (descriptor, record) = self.registry.resolve(identity).await?;
        if !self.authorizer.can_run(user, identity).await {
            return Err(DispatchError::Forbidden(format!(
                "{} is not allowed to run {}",
                user, identity
            )));
        }

        let args = descriptor
            .schema()
            .validate(&request.data, self.lookup.as_ref())
            .await
            .map_err(DispatchError::Validation)?;

        let schedule = request.schedule;
        let interval = schedule
            .as_ref()
            .map(|s| s.interval)
            .unwrap_or(ScheduleInterval::Immediately);
        let immediate = interval == ScheduleInterval::Immediately;
        let dry_run = descriptor
            .dry_run_variable()
            .is_some_and(|v| args.boolean(&v.name) == Some(true));
        let approval_required = descriptor.meta.approval_required && !(dry_run && immediate);

        if immediate && !approval_required {
            let result_id = self
                .enqueue(descriptor, &record, user, args, request.force_release, None)
                .await?;
            return Ok(RunJobResponse::Enqueued { result_id });
        }

        if descriptor.meta.sensitive_variables {
            return Err(DispatchError::Unsupported(format!(
                "Job {} has sensitive variables and cannot be scheduled or held for approval",
                identity
            )));
        }
        if args.has_file() {
            return Err(DispatchError::Unsupported(format!(
                "Job {} was given an uploaded file and cannot be scheduled or held for approval",
                identity
            )));
        }

        let now = Utc::now();
        let start_time = match interval {
            ScheduleInterval::Immediately => now,
            _ => schedule.as_ref().and_then(|s| s.start_time).unwrap_or(now),
        };
        if interval == ScheduleInterval::Future && start_time <= now {
            return Err(DispatchError::Validation(vec![FieldError::new(
                "_schedule_start_time",
                "Scheduled time must be in the future.",
            )]));
        }

        let scheduled = ScheduledJob {
            id: Uuid::new_v4(),
            name: schedule
                .and_then(|s| s.name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{} ({})", record.display_name(), user)),
            job_identity: identity.clone(),
            user: user.to_string(),
            kwargs: Value::Object(args.to_raw()),
            interval,
            start_time,
            last_run_at: None,
            total_run_count: 0,
            approval_required,
            approved_by: None,
            approved_at: None,
            enabled: true,
            created_at: now,
        };
        self.schedules.insert_scheduled(&scheduled).await?;

        info!(
            "Held job {} as scheduled job {} ({}, approval required: {})",
            identity, scheduled.id, interval, approval_required
        );
        Ok(RunJobResponse::Scheduled {
            scheduled_job_id: scheduled.id,
            approval_required,
        })
    }

    /// Creates the `PENDING` result and hands the execution to the executor
    async fn enqueue(
        &self,
        descriptor: Arc<JobDescriptor>,
        record: &JobRecord,
        user: &str,
        args: Arguments,
        force_release: bool,
        scheduled_job_id: Option<Uuid>,
    ) -> Result<Uuid, StoreError> {
        let kwargs = Value::Object(args.to_raw());
        let result = self
            .results
            .create_result(&descriptor, record, user, Some(kwargs), scheduled_job_id)
            .await?;
        let result_id = result.id;

        let runner = Arc::clone(&self.runner);
        let execution = Execution {
            descriptor,
            result_id,
            user: user.to_string(),
            args,
            force_release,
        };
        self.executor.submit(
            &record.queue,
            Box::pin(async move {
                if let Err(e) = runner.execute(execution).await {
                    error!("Execution of job result {} failed: {}", result_id, e);
                }
            }),
        );

        info!(
            "Enqueued job {} as result {} on queue {}",
            result.job_identity, result_id, record.queue
        );
        Ok(result_id)
    }

    /// Signs off a held request
    ///
    /// Immediate requests are re-validated and dispatched right away;
    /// deferred and recurring ones become eligible for the scheduler.
    pub async fn approve(
        &self,
        id: Uuid,
        approver: &str,
    ) -> Result<ApprovalOutcome, DispatchError> {
        let pending = self.pending_approval(id).await?;

        if pending.user == approver {
            return Err(DispatchError::Forbidden(
                "You cannot approve your own job request".to_string(),
            ));
        }
        if !self
            .authorizer
            .can_approve(approver, &pending.job_identity)
            .await
        {
            return Err(DispatchError::Forbidden(format!(
                "{} is not allowed to approve {}",
                approver, pending.job_identity
            )));
        }

        // Only one concurrent approval wins the claim
        let now = Utc::now();
        let Some(mut scheduled) = self.schedules.claim_approval(id, approver, now).await? else {
            return Err(DispatchError::InvalidState(format!(
                "Scheduled job {} is not awaiting approval",
                id
            )));
        };

        let result_id = if scheduled.interval == ScheduleInterval::Immediately {
            Some(self.dispatch_scheduled(&mut scheduled, now).await?)
        } else {
            None
        };

        info!(
            "Scheduled job {} approved by {}",
            scheduled.id, approver
        );
        Ok(ApprovalOutcome {
            scheduled_job: scheduled,
            result_id,
        })
    }

    /// Rejects a held request, deleting it
    ///
    /// The submitter may always withdraw their own request.
    pub async fn deny(&self, id: Uuid, approver: &str) -> Result<ScheduledJob, DispatchError> {
        let scheduled = self.pending_approval(id).await?;

        if scheduled.user != approver
            && !self
                .authorizer
                .can_approve(approver, &scheduled.job_identity)
                .await
        {
            return Err(DispatchError::Forbidden(format!(
                "{} is not allowed to deny {}",
                approver, scheduled.job_identity
            )));
        }

        self.schedules.delete_scheduled(id).await?;
        info!("Scheduled job {} denied by {}", id, approver);
        Ok(scheduled)
    }

    async fn pending_approval(&self, id: Uuid) -> Result<ScheduledJob, DispatchError> {
        let scheduled = self.get_scheduled(id).await?;
        if !scheduled.is_awaiting_approval() {
            return Err(DispatchError::InvalidState(format!(
                "Scheduled job {} is not awaiting approval",
                id
            )));
        }
        Ok(scheduled)
    }

    pub async fn get_scheduled(&self, id: Uuid) -> Result<ScheduledJob, DispatchError> {
        self.schedules
            .get_scheduled(id)
            .await?
            .ok_or(DispatchError::ScheduledJobNotFound(id))
    }

    pub async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>, DispatchError> {
        Ok(self.schedules.list_scheduled().await?)
    }

    /// Runs a held argument set and advances its schedule
    ///
    /// The arguments are validated again exactly like a direct submission.
    /// One-off schedules are disabled afterwards; recurring ones move to
    /// their next start time.
    pub async fn dispatch_scheduled(
        &self,
        scheduled: &mut ScheduledJob,
        now: DateTime<Utc>,
    ) -> Result<Uuid, DispatchError> {
        let (descriptor, record) = self.registry.resolve(&scheduled.job_identity).await?;
        let raw = match &scheduled.kwargs {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let args = descriptor
            .schema()
            .validate(&raw, self.lookup.as_ref())
            .await
            .map_err(DispatchError::Validation)?;

        let result_id = self
            .enqueue(
                descriptor,
                &record,
                &scheduled.user,
                args,
                false,
                Some(scheduled.id),
            )
            .await?;

        scheduled.last_run_at = Some(now);
        scheduled.total_run_count += 1;
        match scheduled.interval.next_after(scheduled.start_time, now) {
            Some(next) => scheduled.start_time = next,
            None => scheduled.enabled = false,
        }
        self.schedules.update_scheduled(scheduled).await?;

        Ok(result_id)
    }

    /// Entries due at `now`
    pub(crate) async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        self.schedules.due_scheduled(now).await
    }

    pub(crate) async fn disable_scheduled(&self, scheduled: &mut ScheduledJob) -> Result<(), StoreError> {
        scheduled.enabled = false;
        self.schedules.update_scheduled(scheduled).await
    }
}
