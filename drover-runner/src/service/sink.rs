//! Buffered job sink
//!
//! Collects the log records of one execution in memory; the runner drains
//! the buffer into the result store on an interval and once more at close.
//! The periodic flusher is stopped between flushes, never inside one, so a
//! drained batch is always either written or put back.

use async_trait::async_trait;
use drover_core::domain::file::JobFile;
use drover_jobs::{FileError, JobSink, LogRecord};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error};
use uuid::Uuid;

use crate::repository::StoreError;
use crate::service::ResultService;

pub struct BufferedSink {
    result_id: Uuid,
    buffer: Mutex<Vec<LogRecord>>,
    /// Serializes flushes so entries reach the store in emission order
    flushing: tokio::sync::Mutex<()>,
    results: Arc<ResultService>,
}

impl BufferedSink {
    pub fn new(result_id: Uuid, results: Arc<ResultService>) -> Self {
        Self {
            result_id,
            buffer: Mutex::new(Vec::new()),
            flushing: tokio::sync::Mutex::new(()),
            results,
        }
    }

    fn drain(&self) -> Vec<LogRecord> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }

    /// Writes everything buffered so far
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _flushing = self.flushing.lock().await;
        let records = self.drain();
        if records.is_empty() {
            return Ok(());
        }

        debug!("Flushing {} log entries of job result {}", records.len(), self.result_id);
        if let Err(e) = self.results.append_records(self.result_id, &records).await {
            // Keep the entries for the next attempt
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.splice(0..0, records);
            return Err(e);
        }
        Ok(())
    }

    /// Spawns a background task flushing the buffer periodically
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> Flusher {
        let sink = Arc::clone(self);
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                if let Err(e) = sink.flush().await {
                    error!(
                        "Failed to flush logs of job result {}: {}",
                        sink.result_id, e
                    );
                }
            }
        });

        Flusher { stop, handle }
    }
}

/// Periodic flush task of one sink
pub struct Flusher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Stops the task, waiting out a flush already in progress
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!("Log flusher task failed: {}", e);
        }
    }
}

#[async_trait]
impl JobSink for BufferedSink {
    fn log(&self, record: LogRecord) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(record);
    }

    async fn create_file(&self, name: &str, content: Vec<u8>) -> Result<JobFile, FileError> {
        self.results
            .create_file(self.result_id, name, content)
            .await
            .map_err(|e| match e {
                StoreError::FileTooLarge { name, size, max } => {
                    FileError::TooLarge { name, size, max }
                }
                other => FileError::Store(other.to_string()),
            })
    }
}
