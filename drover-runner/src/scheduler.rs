//! Scheduler loop
//!
//! Periodically dispatches scheduled jobs that are enabled, approved when
//! required, and due.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, JobDispatcher};
use crate::repository::StoreError;

pub struct Scheduler {
    dispatcher: Arc<JobDispatcher>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<JobDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Starts the scheduling loop
    pub async fn run(&self) {
        info!("Starting scheduler (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;

            match self.tick(Utc::now()).await {
                Ok(dispatched) if dispatched > 0 => {
                    info!("Dispatched {} scheduled job(s)", dispatched)
                }
                Ok(_) => debug!("No scheduled jobs due"),
                Err(e) => error!("Error during scheduler cycle: {}", e),
            }
        }
    }

    /// Dispatches everything due at `now`
    ///
    /// Entries that can no longer run (job gone or disabled, arguments no
    /// longer valid) are disabled with a warning.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let due = self.dispatcher.due_scheduled(now).await?;
        let mut dispatched = 0;

        for mut scheduled in due {
            match self.dispatcher.dispatch_scheduled(&mut scheduled, now).await {
                Ok(result_id) => {
                    dispatched += 1;
                    info!(
                        "Scheduled job {} ({}) dispatched as result {}",
                        scheduled.id, scheduled.name, result_id
                    );
                }
                Err(DispatchError::Store(e)) => return Err(e),
                Err(e) => {
                    warn!(
                        "Disabling scheduled job {} ({}): {}",
                        scheduled.id, scheduled.name, e
                    );
                    self.dispatcher.disable_scheduled(&mut scheduled).await?;
                }
            }
        }

        Ok(dispatched)
    }
}
