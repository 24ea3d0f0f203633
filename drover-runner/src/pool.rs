//! Worker pool
//!
//! In-process executor: each queue gets its own semaphore so a busy queue
//! never starves another.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs tasks on named queues
pub trait Executor: Send + Sync {
    fn submit(&self, queue: &str, task: Task) -> JoinHandle<()>;
}

pub struct WorkerPool {
    workers_per_queue: usize,
    queues: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl WorkerPool {
    pub fn new(workers_per_queue: usize) -> Self {
        Self {
            workers_per_queue,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, queue: &str) -> Arc<Semaphore> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            queues
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.workers_per_queue))),
        )
    }

    /// Free worker slots of `queue`
    pub fn available(&self, queue: &str) -> usize {
        self.semaphore(queue).available_permits()
    }
}

impl Executor for WorkerPool {
    fn submit(&self, queue: &str, task: Task) -> JoinHandle<()> {
        let semaphore = self.semaphore(queue);
        let queue = queue.to_string();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                warn!("Queue {} is closed, dropping task", queue);
                return;
            };
            debug!("Starting task on queue {}", queue);
            task.await;
            // Permit is released when dropped
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_queue_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(
                    "default",
                    Box::pin(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    }),
                )
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available("default"), 2);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let blocked = pool.submit(
            "slow",
            Box::pin(async move {
                let _ = rx.await;
            }),
        );
        let fast = pool.submit("fast", Box::pin(async {}));

        tokio::time::timeout(Duration::from_secs(1), fast)
            .await
            .unwrap()
            .unwrap();

        tx.send(()).unwrap();
        blocked.await.unwrap();
    }
}
