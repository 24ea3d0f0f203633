use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::file::JobFile;
use drover_core::domain::job::{JobIdentity, JobMeta, JobRecord, SourceKind};
use drover_core::domain::log::JobLogEntry;
use drover_core::domain::result::{JobResult, JobStatus};
use drover_core::domain::variable::VariableDefinition;
use drover_core::dto::job::UpdateJobRecord;
use drover_core::dto::result::ResultQuery;
use drover_jobs::{
    AfterReturn, Arguments, BeforeStart, Job, JobClass, JobContext, JobDescriptor, JobFailure,
    JobSource, LogRecord, MemoryObjects, OnFailure, OnSuccess, Registrar, Sanitizer, TimeLimits,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::dispatch::{Authorizer, JobDispatcher};
use crate::lock::{MemoryLock, SingletonLock};
use crate::pool::WorkerPool;
use crate::registry::JobRegistry;
use crate::repository::{MemoryStore, Outcome, RecordRepository, ResultRepository, StoreError};
use crate::runner::{Execution, JobRunner};
use crate::service::ResultService;

pub(crate) const FILE_MAX_SIZE: u64 = 1024;

// Test jobs

#[derive(Default)]
pub(crate) struct Noop;

#[async_trait]
impl Job for Noop {
    async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

#[derive(Default)]
pub(crate) struct Greet;

#[async_trait]
impl Job for Greet {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let greeting = format!("Hello, {}!", args.string("who").unwrap_or("world"));
        ctx.log_info(&greeting);
        Ok(Some(Value::String(greeting)))
    }

    fn as_on_success(&self) -> Option<&dyn OnSuccess> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

#[async_trait]
impl OnSuccess for Greet {
    async fn on_success(&self, ctx: &JobContext, result: Option<&Value>) -> anyhow::Result<()> {
        let length = result.and_then(Value::as_str).map_or(0, str::len);
        ctx.log_info(format!("on_success saw {} characters", length));
        Ok(())
    }
}

#[async_trait]
impl AfterReturn for Greet {
    async fn after_return(&self, ctx: &JobContext, status: JobStatus) -> anyhow::Result<()> {
        ctx.log_info(format!("after_return: {}", status));
        Ok(())
    }
}

impl JobClass for Greet {
    const CLASS_NAME: &'static str = "Greet";

    fn meta() -> JobMeta {
        JobMeta::new("Greet").description("Says hello")
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![VariableDefinition::string("who").default("world")]
    }
}

/// Logs every outcome hook it gets
macro_rules! failure_hooks {
    ($job:ty) => {
        #[async_trait]
        impl OnFailure for $job {
            async fn on_failure(&self, ctx: &JobContext, failure: &JobFailure) -> anyhow::Result<()> {
                ctx.log_info(format!("on_failure: {}", failure.message()));
                Ok(())
            }
        }

        #[async_trait]
        impl AfterReturn for $job {
            async fn after_return(&self, ctx: &JobContext, status: JobStatus) -> anyhow::Result<()> {
                ctx.log_info(format!("after_return: {}", status));
                Ok(())
            }
        }
    };
}

#[derive(Default)]
pub(crate) struct SoftFails;

failure_hooks!(SoftFails);

#[async_trait]
impl Job for SoftFails {
    async fn run(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        ctx.fail("device unreachable");
        ctx.log_info("kept going");
        Ok(Some(json!(3)))
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

impl JobClass for SoftFails {
    const CLASS_NAME: &'static str = "SoftFails";

    fn meta() -> JobMeta {
        JobMeta::new("Soft fails")
    }
}

#[derive(Default)]
pub(crate) struct Raises;

failure_hooks!(Raises);

#[async_trait]
impl Job for Raises {
    async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        Err(anyhow::anyhow!("connection refused, password=hunter2"))
            .context("failed to reach device")
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

impl JobClass for Raises {
    const CLASS_NAME: &'static str = "Raises";

    fn meta() -> JobMeta {
        JobMeta::new("Raises")
    }
}

#[derive(Default)]
pub(crate) struct Broken;

failure_hooks!(Broken);

#[async_trait]
impl Job for Broken {
    async fn run(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        ctx.log_info("run reached");
        Ok(None)
    }

    fn as_before_start(&self) -> Option<&dyn BeforeStart> {
        Some(self)
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

#[async_trait]
impl BeforeStart for Broken {
    async fn before_start(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<()> {
        anyhow::bail!("no credentials for device")
    }
}

impl JobClass for Broken {
    const CLASS_NAME: &'static str = "Broken";

    fn meta() -> JobMeta {
        JobMeta::new("Broken")
    }
}

#[derive(Default)]
pub(crate) struct Panics;

failure_hooks!(Panics);

#[async_trait]
impl Job for Panics {
    async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        panic!("index out of range");
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

impl JobClass for Panics {
    const CLASS_NAME: &'static str = "Panics";

    fn meta() -> JobMeta {
        JobMeta::new("Panics")
    }
}

/// Singleton job that outlives any test time limit
#[derive(Default)]
pub(crate) struct Sleepy;

failure_hooks!(Sleepy);

#[async_trait]
impl Job for Sleepy {
    async fn run(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        ctx.soft_deadline().await;
        ctx.log_info("soft deadline observed");
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    fn as_on_failure(&self) -> Option<&dyn OnFailure> {
        Some(self)
    }

    fn as_after_return(&self) -> Option<&dyn AfterReturn> {
        Some(self)
    }
}

impl JobClass for Sleepy {
    const CLASS_NAME: &'static str = "Sleepy";

    fn meta() -> JobMeta {
        JobMeta::new("Sleepy").singleton()
    }
}

/// Singleton job holding its lock for a moment
#[derive(Default)]
pub(crate) struct Exclusive;

#[async_trait]
impl Job for Exclusive {
    async fn run(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        ctx.log_info("holding the lock");
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(None)
    }
}

impl JobClass for Exclusive {
    const CLASS_NAME: &'static str = "Exclusive";

    fn meta() -> JobMeta {
        JobMeta::new("Exclusive").singleton()
    }
}

#[derive(Default)]
pub(crate) struct Secret;

#[async_trait]
impl Job for Secret {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let password = args.string("password").unwrap_or_default();
        ctx.log_info(format!("rotating with password={}", password));
        Ok(Some(json!({ "token": password })))
    }
}

impl JobClass for Secret {
    const CLASS_NAME: &'static str = "Secret";

    fn meta() -> JobMeta {
        JobMeta::new("Rotate secret")
            .sensitive_variables()
            .approval_required()
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![VariableDefinition::string("password")]
    }
}

#[derive(Default)]
pub(crate) struct Exporter;

#[async_trait]
impl Job for Exporter {
    async fn run(&self, ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        ctx.create_file("report.csv", "device,status\ncore-1,ok\n").await?;
        if let Err(e) = ctx.create_file("dump.bin", vec![0u8; 2048]).await {
            ctx.log_warning(e.to_string());
        }
        Ok(None)
    }
}

impl JobClass for Exporter {
    const CLASS_NAME: &'static str = "Exporter";

    fn meta() -> JobMeta {
        JobMeta::new("Exporter")
    }
}

#[derive(Default)]
pub(crate) struct Gated;

#[async_trait]
impl Job for Gated {
    async fn run(&self, ctx: &JobContext, args: &Arguments) -> anyhow::Result<Option<Value>> {
        let device = args.string("device").unwrap_or_default();
        if args.boolean("dryrun") == Some(true) {
            ctx.log_info(format!("would reload {}", device));
        } else {
            ctx.log_info(format!("reloading {}", device));
        }
        Ok(None)
    }
}

impl JobClass for Gated {
    const CLASS_NAME: &'static str = "Gated";

    fn meta() -> JobMeta {
        JobMeta::new("Reload device").approval_required()
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![
            VariableDefinition::string("device"),
            VariableDefinition::dry_run("dryrun"),
        ]
    }
}

#[derive(Default)]
pub(crate) struct Upload;

#[async_trait]
impl Job for Upload {
    async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

impl JobClass for Upload {
    const CLASS_NAME: &'static str = "Upload";

    fn meta() -> JobMeta {
        JobMeta::new("Push config").approval_required()
    }

    fn variables() -> Vec<VariableDefinition> {
        vec![VariableDefinition::file("config")]
    }
}

// Failing and slow backends

/// Lock backend that is unreachable
pub(crate) struct BrokenLock;

#[async_trait]
impl SingletonLock for BrokenLock {
    async fn acquire(
        &self,
        _key: &str,
        _ttl: Duration,
        _force: bool,
    ) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn release(&self, _key: &str, _token: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory results whose log appends take `delay`
pub(crate) struct SlowLogs {
    store: MemoryStore,
    delay: Duration,
}

impl SlowLogs {
    pub fn new(delay: Duration) -> Self {
        Self {
            store: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl ResultRepository for SlowLogs {
    async fn insert_result(&self, result: &JobResult) -> Result<(), StoreError> {
        self.store.insert_result(result).await
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError> {
        self.store.get_result(id).await
    }

    async fn list_results(&self, query: &ResultQuery) -> Result<Vec<JobResult>, StoreError> {
        self.store.list_results(query).await
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.mark_running(id, started_at).await
    }

    async fn finalize(
        &self,
        id: Uuid,
        outcome: &Outcome,
        completed_at: DateTime<Utc>,
    ) -> Result<JobResult, StoreError> {
        self.store.finalize(id, outcome, completed_at).await
    }

    async fn delete_result(&self, id: Uuid) -> Result<bool, StoreError> {
        self.store.delete_result(id).await
    }

    async fn append_logs(&self, result_id: Uuid, records: &[LogRecord]) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.store.append_logs(result_id, records).await
    }

    async fn logs(&self, result_id: Uuid) -> Result<Vec<JobLogEntry>, StoreError> {
        self.store.logs(result_id).await
    }

    async fn insert_file(&self, file: &JobFile, content: &[u8]) -> Result<(), StoreError> {
        self.store.insert_file(file, content).await
    }

    async fn files(&self, result_id: Uuid) -> Result<Vec<JobFile>, StoreError> {
        self.store.files(result_id).await
    }

    async fn file_content(
        &self,
        result_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<(JobFile, Vec<u8>)>, StoreError> {
        self.store.file_content(result_id, file_id).await
    }
}

// Descriptors and records

pub(crate) fn descriptor(meta: JobMeta) -> Arc<JobDescriptor> {
    Arc::new(JobDescriptor {
        identity: JobIdentity::new(SourceKind::Local, "tests", "Noop").unwrap(),
        limits: TimeLimits::resolve(&meta, TimeLimits::from_secs(5, 10)),
        meta,
        variables: Vec::new(),
        factory: Arc::new(|| -> Box<dyn Job> { Box::new(Noop) }),
    })
}

pub(crate) fn descriptor_of<J: JobClass>() -> Arc<JobDescriptor> {
    let meta = J::meta();
    Arc::new(JobDescriptor {
        identity: JobIdentity::new(SourceKind::Local, "tests", J::CLASS_NAME).unwrap(),
        limits: TimeLimits::resolve(&meta, TimeLimits::from_secs(5, 10)),
        meta,
        variables: J::variables(),
        factory: Arc::new(|| -> Box<dyn Job> { Box::new(J::default()) }),
    })
}

pub(crate) fn with_limits(descriptor: Arc<JobDescriptor>, limits: TimeLimits) -> Arc<JobDescriptor> {
    let mut descriptor = (*descriptor).clone();
    descriptor.limits = limits;
    Arc::new(descriptor)
}

pub(crate) fn record(descriptor: &JobDescriptor) -> JobRecord {
    let now = Utc::now();
    JobRecord {
        identity: descriptor.identity.clone(),
        source: descriptor.kind(),
        name: descriptor.meta.name.clone(),
        grouping: descriptor.identity.group().to_string(),
        description: descriptor.meta.description.clone(),
        enabled: true,
        installed: true,
        name_override: None,
        grouping_override: None,
        description_override: None,
        queue: "default".to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) async fn wait_for(results: &ResultService, id: Uuid) -> JobResult {
    for _ in 0..500 {
        let result = results.get(id).await.unwrap();
        if result.is_finished() {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job result {} did not finish", id);
}

fn results_service(store: Arc<MemoryStore>) -> Arc<ResultService> {
    Arc::new(ResultService::new(
        store,
        Arc::new(Sanitizer::default()),
        FILE_MAX_SIZE,
    ))
}

/// Runner over an in-memory store, driven directly
pub(crate) struct Harness {
    pub results: Arc<ResultService>,
    pub lock: Arc<MemoryLock>,
    pub runner: JobRunner,
}

impl Harness {
    pub fn new() -> Self {
        let lock = Arc::new(MemoryLock::new());
        Self::with_lock(lock.clone(), lock)
    }

    /// Runner taking its singleton leases from `runner_lock`
    pub fn with_lock(lock: Arc<MemoryLock>, runner_lock: Arc<dyn SingletonLock>) -> Self {
        let results = results_service(Arc::new(MemoryStore::new()));
        let runner = JobRunner::new(results.clone(), runner_lock, Duration::from_millis(10));
        Self {
            results,
            lock,
            runner,
        }
    }

    pub async fn execute(&self, descriptor: Arc<JobDescriptor>, args: Arguments) -> JobResult {
        self.execute_with(descriptor, args, false).await
    }

    pub async fn execute_with(
        &self,
        descriptor: Arc<JobDescriptor>,
        args: Arguments,
        force_release: bool,
    ) -> JobResult {
        let result = self
            .results
            .create_result(
                &descriptor,
                &record(&descriptor),
                "alice",
                Some(Value::Object(args.to_raw())),
                None,
            )
            .await
            .unwrap();
        self.runner
            .execute(Execution {
                descriptor,
                result_id: result.id,
                user: "alice".to_string(),
                args,
                force_release,
            })
            .await
            .unwrap()
    }

    pub async fn messages(&self, result_id: Uuid) -> Vec<String> {
        self.results
            .logs(result_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }
}

// Full dispatch stack

struct TestSource;

impl JobSource for TestSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Plugin
    }

    fn name(&self) -> &str {
        "tests"
    }

    fn group_base(&self) -> Option<&str> {
        Some("tests")
    }

    fn load(&self, registrar: &mut Registrar) -> anyhow::Result<()> {
        registrar.register::<Greet>("jobs");
        registrar.register::<Gated>("jobs");
        registrar.register::<Secret>("jobs");
        registrar.register::<Upload>("jobs");
        registrar.register::<Exclusive>("jobs");
        Ok(())
    }
}

pub(crate) fn greet() -> JobIdentity {
    JobIdentity::new(SourceKind::Plugin, "tests.jobs", "Greet").unwrap()
}

pub(crate) fn gated() -> JobIdentity {
    JobIdentity::new(SourceKind::Plugin, "tests.jobs", "Gated").unwrap()
}

pub(crate) fn secret() -> JobIdentity {
    JobIdentity::new(SourceKind::Plugin, "tests.jobs", "Secret").unwrap()
}

pub(crate) fn upload() -> JobIdentity {
    JobIdentity::new(SourceKind::Plugin, "tests.jobs", "Upload").unwrap()
}

pub(crate) fn exclusive() -> JobIdentity {
    JobIdentity::new(SourceKind::Plugin, "tests.jobs", "Exclusive").unwrap()
}

/// Everyone but mallory may do anything
struct DenyMallory;

#[async_trait]
impl Authorizer for DenyMallory {
    async fn can_run(&self, user: &str, _identity: &JobIdentity) -> bool {
        user != "mallory"
    }

    async fn can_approve(&self, user: &str, _identity: &JobIdentity) -> bool {
        // Lets concurrent approvals interleave
        tokio::task::yield_now().await;
        user != "mallory"
    }
}

pub(crate) struct Stack {
    pub results: Arc<ResultService>,
    pub lock: Arc<MemoryLock>,
    pub registry: Arc<JobRegistry>,
    pub dispatcher: Arc<JobDispatcher>,
}

impl Stack {
    /// Discovered, synced and with every job enabled
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let results = results_service(store.clone());
        let lock = Arc::new(MemoryLock::new());
        let runner = Arc::new(JobRunner::new(
            results.clone(),
            lock.clone(),
            Duration::from_millis(10),
        ));
        let registry = Arc::new(JobRegistry::new(
            vec![Arc::new(TestSource)],
            TimeLimits::from_secs(5, 10),
            "default",
            store.clone(),
        ));
        registry.discover().await.unwrap();
        registry.sync().await.unwrap();
        for record in store.list_records().await.unwrap() {
            registry
                .update_record(
                    &record.identity,
                    UpdateJobRecord {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let dispatcher = Arc::new(JobDispatcher::new(
            registry.clone(),
            results.clone(),
            store,
            runner,
            Arc::new(WorkerPool::new(2)),
            Arc::new(MemoryObjects::new()),
            Arc::new(DenyMallory),
        ));

        Self {
            results,
            lock,
            registry,
            dispatcher,
        }
    }

    pub async fn disable(&self, identity: &JobIdentity) {
        self.registry
            .update_record(
                identity,
                UpdateJobRecord {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
}
