use async_trait::async_trait;
use chrono::Utc;
use drover_core::domain::file::JobFile;
use drover_core::domain::job::{JobIdentity, SourceKind};
use drover_jobs::{FileError, JobContext, JobSink, LogRecord, Sanitizer};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

pub(crate) struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
    files: Mutex<Vec<(String, Vec<u8>)>>,
    max_file_size: u64,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::with_max_file_size(1024)
    }
}

impl RecordingSink {
    pub(crate) fn with_max_file_size(max_file_size: u64) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            max_file_size,
        }
    }

    pub(crate) fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub(crate) fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSink for RecordingSink {
    fn log(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }

    async fn create_file(&self, name: &str, content: Vec<u8>) -> Result<JobFile, FileError> {
        let size = content.len() as u64;
        if size > self.max_file_size {
            return Err(FileError::TooLarge {
                name: name.to_string(),
                size,
                max: self.max_file_size,
            });
        }
        self.files.lock().unwrap().push((name.to_string(), content));
        Ok(JobFile {
            id: Uuid::new_v4(),
            result_id: Uuid::nil(),
            name: name.to_string(),
            size,
            created_at: Utc::now(),
        })
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
