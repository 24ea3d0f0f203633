//! Singleton lock
//!
//! TTL-based mutual exclusion between executions of the same job. A lease
//! that outlives its TTL is free to be taken again, so a crashed holder
//! blocks new executions for at most the job's hard time limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repository::StoreError;

#[async_trait]
pub trait SingletonLock: Send + Sync {
    /// Takes the lease on `key`, returning its token
    ///
    /// Returns `None` when another live lease holds the key. `force` steals
    /// the lease regardless.
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
    ) -> Result<Option<String>, StoreError>;

    /// Drops the lease if `token` still holds it
    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SingletonLock for MemoryLock {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
    ) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, expires_at)) = leases.get(key) {
            if *expires_at > now && !force {
                return Ok(None);
            }
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(StoreError::backend)?;
        let token = Uuid::new_v4().to_string();
        leases.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(key).is_some_and(|(held, _)| held == token) {
            leases.remove(key);
        }
        Ok(())
    }
}

/// A held lease, released on every exit path
///
/// Prefer [`LockGuard::release`]; dropping an unreleased guard releases the
/// lease from a spawned task.
pub struct LockGuard {
    lock: Arc<dyn SingletonLock>,
    key: String,
    token: Option<String>,
}

impl LockGuard {
    /// Acquires `key`, or returns `None` when it is held elsewhere
    pub async fn acquire(
        lock: Arc<dyn SingletonLock>,
        key: String,
        ttl: Duration,
        force: bool,
    ) -> Result<Option<Self>, StoreError> {
        if force {
            warn!("Force-releasing singleton lock {}", key);
        }
        let Some(token) = lock.acquire(&key, ttl, force).await? else {
            return Ok(None);
        };
        debug!("Acquired singleton lock {}", key);
        Ok(Some(Self {
            lock,
            key,
            token: Some(token),
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            match self.lock.release(&self.key, &token).await {
                Ok(()) => debug!("Released singleton lock {}", self.key),
                Err(e) => warn!("Failed to release singleton lock {}: {}", self.key, e),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let lock = Arc::clone(&self.lock);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(&key, &token).await {
                        warn!("Failed to release singleton lock {}: {}", key, e);
                    }
                });
            }
            Err(_) => warn!("Singleton lock {} left to expire", key),
        }
    }
}
