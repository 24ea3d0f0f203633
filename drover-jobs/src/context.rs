//! Execution context handed to running jobs
//!
//! `JobContext` is the job-facing logging facade. Every message is run
//! through the [`Sanitizer`] first, mirrored to `tracing`, and then handed
//! to the execution's [`JobSink`] when it should be persisted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::file::JobFile;
use drover_core::domain::job::JobIdentity;
use drover_core::domain::log::{LogLevel, ObjectRef};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use crate::sanitizer::Sanitizer;

/// A sanitized log line on its way to the result store
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub grouping: Option<String>,
    pub object: Option<ObjectRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("file '{name}' is {size} bytes, above the {max} byte limit")]
    TooLarge { name: String, size: u64, max: u64 },

    #[error("failed to store file: {0}")]
    Store(String),
}

/// Destination of one execution's log lines and output files
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Queues a record; records must be persisted in call order
    fn log(&self, record: LogRecord);

    async fn create_file(&self, name: &str, content: Vec<u8>) -> Result<JobFile, FileError>;
}

/// Optional attributes of a log call
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Overrides the phase-derived grouping
    pub grouping: Option<String>,
    pub object: Option<ObjectRef>,
    /// When false the line only goes to `tracing`
    pub persist: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            grouping: None,
            object: None,
            persist: true,
        }
    }
}

impl LogOptions {
    pub fn grouping(mut self, grouping: impl Into<String>) -> Self {
        self.grouping = Some(grouping.into());
        self
    }

    pub fn object(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Lifecycle phase currently executing; the default log grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialization,
    BeforeStart,
    Run,
    OnSuccess,
    OnFailure,
    AfterReturn,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialization => "initialization",
            Phase::BeforeStart => "before_start",
            Phase::Run => "run",
            Phase::OnSuccess => "on_success",
            Phase::OnFailure => "on_failure",
            Phase::AfterReturn => "after_return",
        }
    }
}

/// Cloning yields a handle to the same execution
#[derive(Clone)]
pub struct JobContext {
    result_id: Uuid,
    identity: JobIdentity,
    user: String,
    sink: Arc<dyn JobSink>,
    sanitizer: Arc<Sanitizer>,
    phase: Arc<Mutex<Phase>>,
    soft_failure: Arc<Mutex<Option<String>>>,
    soft_deadline: watch::Receiver<bool>,
}

impl JobContext {
    /// `soft_deadline` flips to `true` once the soft time limit passes
    pub fn new(
        result_id: Uuid,
        identity: JobIdentity,
        user: impl Into<String>,
        sink: Arc<dyn JobSink>,
        sanitizer: Arc<Sanitizer>,
        soft_deadline: watch::Receiver<bool>,
    ) -> Self {
        Self {
            result_id,
            identity,
            user: user.into(),
            sink,
            sanitizer,
            phase: Arc::new(Mutex::new(Phase::Initialization)),
            soft_failure: Arc::new(Mutex::new(None)),
            soft_deadline,
        }
    }

    pub fn result_id(&self) -> Uuid {
        self.result_id
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    /// Principal that initiated the run
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    pub fn log_with(&self, level: LogLevel, message: impl AsRef<str>, options: LogOptions) {
        let message = self.sanitizer.sanitize(message.as_ref());
        let result_id = self.result_id;

        match level {
            LogLevel::Debug => tracing::debug!(job_result = %result_id, level = %level, "{}", message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(job_result = %result_id, level = %level, "{}", message)
            }
            LogLevel::Warning | LogLevel::Failure => {
                tracing::warn!(job_result = %result_id, level = %level, "{}", message)
            }
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(job_result = %result_id, level = %level, "{}", message)
            }
        }

        if !options.persist {
            return;
        }

        let grouping = options
            .grouping
            .unwrap_or_else(|| self.phase().as_str().to_string());
        self.sink.log(LogRecord {
            timestamp: Utc::now(),
            level,
            message,
            grouping: Some(grouping),
            object: options.object,
        });
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.log_with(level, message, LogOptions::default());
    }

    pub fn log_debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_success(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Success, message);
    }

    pub fn log_warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_failure(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Failure, message);
    }

    pub fn log_error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    pub fn log_critical(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Critical, message);
    }

    /// Marks the execution as failed without raising an error
    ///
    /// The work function keeps running; the first reason wins.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log_failure(&reason);
        let mut slot = self.soft_failure.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(self.sanitizer.sanitize(&reason));
        }
    }

    pub fn soft_failure(&self) -> Option<String> {
        self.soft_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn soft_time_limit_exceeded(&self) -> bool {
        *self.soft_deadline.borrow()
    }

    /// Resolves once the soft time limit has passed
    pub async fn soft_deadline(&self) {
        let mut rx = self.soft_deadline.clone();
        if rx.wait_for(|exceeded| *exceeded).await.is_err() {
            // No soft limit will ever fire for this execution
            std::future::pending::<()>().await;
        }
    }

    pub async fn create_file(
        &self,
        name: impl AsRef<str>,
        content: impl Into<Vec<u8>>,
    ) -> Result<JobFile, FileError> {
        let file = self.sink.create_file(name.as_ref(), content.into()).await?;
        self.log_with(
            LogLevel::Debug,
            format!("Created file {} ({} bytes)", file.name, file.size),
            LogOptions::default().transient(),
        );
        Ok(file)
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("result_id", &self.result_id)
            .field("identity", &self.identity)
            .field("user", &self.user)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use drover_core::domain::job::SourceKind;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub records: Mutex<Vec<LogRecord>>,
        pub files: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        fn log(&self, record: LogRecord) {
            self.records.lock().unwrap().push(record);
        }

        async fn create_file(&self, name: &str, content: Vec<u8>) -> Result<JobFile, FileError> {
            if content.len() > 16 {
                return Err(FileError::TooLarge {
                    name: name.to_string(),
                    size: content.len() as u64,
                    max: 16,
                });
            }
            let file = JobFile {
                id: Uuid::new_v4(),
                result_id: Uuid::nil(),
                name: name.to_string(),
                size: content.len() as u64,
                created_at: Utc::now(),
            };
            self.files.lock().unwrap().push((name.to_string(), content));
            Ok(file)
        }
    }

    pub(crate) fn context(sink: Arc<RecordingSink>) -> (JobContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let identity = JobIdentity::new(SourceKind::Local, "demo", "Greet").unwrap();
        let ctx = JobContext::new(
            Uuid::new_v4(),
            identity,
            "alice",
            sink,
            Arc::new(Sanitizer::default()),
            rx,
        );
        (ctx, tx)
    }

    #[test]
    fn test_log_sanitizes_and_groups_by_phase() {
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink.clone());

        ctx.set_phase(Phase::Run);
        ctx.log_info("connecting with password=hunter2");
        ctx.log_with(
            LogLevel::Warning,
            "custom",
            LogOptions::default().grouping("interfaces"),
        );
        ctx.log_with(LogLevel::Debug, "not stored", LogOptions::default().transient());

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "connecting with password=(redacted)");
        assert_eq!(records[0].grouping.as_deref(), Some("run"));
        assert_eq!(records[1].level, LogLevel::Warning);
        assert_eq!(records[1].grouping.as_deref(), Some("interfaces"));
    }

    #[test]
    fn test_fail_keeps_first_reason() {
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink.clone());

        assert!(ctx.soft_failure().is_none());
        ctx.fail("bad input");
        ctx.fail("second");
        assert_eq!(ctx.soft_failure().as_deref(), Some("bad input"));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.level == LogLevel::Failure));
    }

    #[tokio::test]
    async fn test_soft_deadline_signal() {
        let sink = Arc::new(RecordingSink::default());
        let (ctx, tx) = context(sink);

        assert!(!ctx.soft_time_limit_exceeded());
        tx.send(true).unwrap();
        assert!(ctx.soft_time_limit_exceeded());
        tokio::time::timeout(std::time::Duration::from_secs(1), ctx.soft_deadline())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_file_goes_through_sink() {
        let sink = Arc::new(RecordingSink::default());
        let (ctx, _tx) = context(sink.clone());

        let file = ctx.create_file("out.txt", "hello").await.unwrap();
        assert_eq!(file.size, 5);
        assert!(matches!(
            ctx.create_file("big.bin", vec![0u8; 32]).await,
            Err(FileError::TooLarge { size: 32, .. })
        ));
        assert_eq!(sink.files.lock().unwrap().len(), 1);
        // transient debug line only
        assert!(sink.records.lock().unwrap().is_empty());
    }
}
