//! Job registry
//!
//! Holds the descriptors discovered from the configured sources and keeps
//! the durable job records in step with them. Records are only created,
//! refreshed or removed by [`JobRegistry::sync`].

use chrono::Utc;
use drover_core::domain::job::{JobIdentity, JobRecord};
use drover_core::dto::job::{SyncReport, UpdateJobRecord};
use drover_jobs::{JobDescriptor, JobSource, RegistrationError, TimeLimits, discover};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::repository::{RecordRepository, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(JobIdentity),

    #[error("job {0} is disabled")]
    Disabled(JobIdentity),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct JobRegistry {
    sources: Vec<Arc<dyn JobSource>>,
    defaults: TimeLimits,
    default_queue: String,
    records: Arc<dyn RecordRepository>,
    descriptors: RwLock<BTreeMap<JobIdentity, Arc<JobDescriptor>>>,
    errors: RwLock<Vec<RegistrationError>>,
}

impl JobRegistry {
    pub fn new(
        sources: Vec<Arc<dyn JobSource>>,
        defaults: TimeLimits,
        default_queue: impl Into<String>,
        records: Arc<dyn RecordRepository>,
    ) -> Self {
        Self {
            sources,
            defaults,
            default_queue: default_queue.into(),
            records,
            descriptors: RwLock::new(BTreeMap::new()),
            errors: RwLock::new(Vec::new()),
        }
    }

    /// Reloads every source, replacing the descriptor map
    ///
    /// Returns the number of descriptors found. Sources read files and
    /// evaluate scripts, so this runs on the blocking pool.
    pub async fn discover(&self) -> anyhow::Result<usize> {
        let sources = self.sources.clone();
        let defaults = self.defaults;
        let discovery = tokio::task::spawn_blocking(move || discover(&sources, defaults)).await?;

        let descriptors: BTreeMap<JobIdentity, Arc<JobDescriptor>> = discovery
            .descriptors
            .into_iter()
            .map(|d| (d.identity.clone(), Arc::new(d)))
            .collect();
        let count = descriptors.len();

        *self.descriptors.write().unwrap_or_else(|e| e.into_inner()) = descriptors;
        *self.errors.write().unwrap_or_else(|e| e.into_inner()) = discovery.errors;

        info!("Discovered {} job(s)", count);
        Ok(count)
    }

    /// Registration errors of the last discovery
    pub fn errors(&self) -> Vec<RegistrationError> {
        self.errors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn descriptor(&self, identity: &JobIdentity) -> Option<Arc<JobDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    fn descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Brings job records in line with the current descriptors
    ///
    /// Missing records are created disabled, changed descriptor-derived
    /// columns are refreshed, records without a descriptor are deleted.
    /// Operator settings (enabled, queue, overrides) are kept.
    pub async fn sync(&self) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();
        let mut existing: BTreeMap<JobIdentity, JobRecord> = self
            .records
            .list_records()
            .await?
            .into_iter()
            .map(|r| (r.identity.clone(), r))
            .collect();

        for descriptor in self.descriptors() {
            match existing.remove(&descriptor.identity) {
                None => {
                    let record = self.new_record(&descriptor);
                    self.records.save_record(&record).await?;
                    report.created.push(record.identity);
                }
                Some(mut record) => {
                    if refresh(&mut record, &descriptor) {
                        record.updated_at = Utc::now();
                        self.records.save_record(&record).await?;
                        report.updated.push(record.identity);
                    }
                }
            }
        }

        for identity in existing.into_keys() {
            self.records.delete_record(&identity).await?;
            report.removed.push(identity);
        }

        if report.is_unchanged() {
            info!("Job records are up to date");
        } else {
            info!(
                "Synced job records: {} created, {} updated, {} removed",
                report.created.len(),
                report.updated.len(),
                report.removed.len()
            );
        }
        Ok(report)
    }

    fn new_record(&self, descriptor: &JobDescriptor) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            identity: descriptor.identity.clone(),
            source: descriptor.kind(),
            name: descriptor.meta.name.clone(),
            grouping: grouping_of(descriptor),
            description: descriptor.meta.description.clone(),
            enabled: false,
            installed: true,
            name_override: None,
            grouping_override: None,
            description_override: None,
            queue: descriptor.queue(&self.default_queue).to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Descriptor and record of an enabled job
    pub async fn resolve(
        &self,
        identity: &JobIdentity,
    ) -> Result<(Arc<JobDescriptor>, JobRecord), RegistryError> {
        let descriptor = self
            .descriptor(identity)
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;
        let record = self
            .records
            .get_record(identity)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;

        if !record.enabled {
            return Err(RegistryError::Disabled(identity.clone()));
        }
        Ok((descriptor, record))
    }

    /// Descriptor and record of a job, enabled or not
    pub async fn get(
        &self,
        identity: &JobIdentity,
    ) -> Result<(Arc<JobDescriptor>, JobRecord), RegistryError> {
        let descriptor = self
            .descriptor(identity)
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;
        let record = self
            .records
            .get_record(identity)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;
        Ok((descriptor, record))
    }

    /// Every job that has both a descriptor and a record
    pub async fn list(&self) -> Result<Vec<(Arc<JobDescriptor>, JobRecord)>, StoreError> {
        let records = self.records.list_records().await?;
        let mut jobs: Vec<_> = records
            .into_iter()
            .filter_map(|record| match self.descriptor(&record.identity) {
                Some(descriptor) => Some((descriptor, record)),
                None => {
                    warn!("Job record {} has no descriptor; run a sync", record.identity);
                    None
                }
            })
            .collect();
        jobs.sort_by(|(a, _), (b, _)| a.identity.cmp(&b.identity));
        Ok(jobs)
    }

    /// Applies operator settings to a record
    pub async fn update_record(
        &self,
        identity: &JobIdentity,
        update: UpdateJobRecord,
    ) -> Result<JobRecord, RegistryError> {
        let mut record = self
            .records
            .get_record(identity)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;

        if let Some(enabled) = update.enabled {
            record.enabled = enabled;
        }
        if let Some(queue) = update.queue.filter(|q| !q.is_empty()) {
            record.queue = queue;
        }
        if let Some(name) = update.name_override {
            record.name_override = non_empty(name);
        }
        if let Some(grouping) = update.grouping_override {
            record.grouping_override = non_empty(grouping);
        }
        if let Some(description) = update.description_override {
            record.description_override = non_empty(description);
        }
        record.updated_at = Utc::now();

        self.records.save_record(&record).await?;
        info!(
            "Updated job {} (enabled: {}, queue: {})",
            record.identity, record.enabled, record.queue
        );
        Ok(record)
    }
}

fn grouping_of(descriptor: &JobDescriptor) -> String {
    descriptor
        .meta
        .grouping
        .clone()
        .unwrap_or_else(|| descriptor.identity.group().to_string())
}

/// Copies descriptor-derived columns, reporting whether anything changed
fn refresh(record: &mut JobRecord, descriptor: &JobDescriptor) -> bool {
    let grouping = grouping_of(descriptor);
    let changed = record.source != descriptor.kind()
        || record.name != descriptor.meta.name
        || record.grouping != grouping
        || record.description != descriptor.meta.description
        || !record.installed;

    record.source = descriptor.kind();
    record.name = descriptor.meta.name.clone();
    record.grouping = grouping;
    record.description = descriptor.meta.description.clone();
    record.installed = true;
    changed
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use drover_core::domain::job::SourceKind;
    use drover_lua::LuaScriptSource;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn registry(root: &Path, store: Arc<MemoryStore>) -> JobRegistry {
        JobRegistry::new(
            vec![Arc::new(LuaScriptSource::local(root))],
            TimeLimits::from_secs(300, 600),
            "default",
            store,
        )
    }

    fn greet() -> JobIdentity {
        JobIdentity::new(SourceKind::Local, "greet", "Greet").unwrap()
    }

    const GREET: &str = r#"
        jobs.register {
            name = "Greet",
            description = "Says hello",
            run = function() log.info("hi") end,
        }
    "#;

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.lua", GREET);
        write(
            dir.path(),
            "ops/backup.lua",
            r#"jobs.register { name = "Backup", queue = "network", run = function() end }"#,
        );
        let store = Arc::new(MemoryStore::new());
        let registry = registry(dir.path(), store.clone());

        assert_eq!(registry.discover().await.unwrap(), 2);
        let report = registry.sync().await.unwrap();
        assert_eq!(report.created.len(), 2);

        let records = store.list_records().await.unwrap();
        assert!(records.iter().all(|r| !r.enabled && r.installed));
        let backup = records.iter().find(|r| r.name == "Backup").unwrap();
        assert_eq!(backup.queue, "network");
        assert_eq!(backup.grouping, "ops.backup");

        let before = store.list_records().await.unwrap();
        let report = registry.sync().await.unwrap();
        assert!(report.is_unchanged());
        assert_eq!(store.list_records().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_sync_refreshes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.lua", GREET);
        write(dir.path(), "gone.lua", r#"jobs.register { name = "Gone", run = function() end }"#);
        let store = Arc::new(MemoryStore::new());
        let registry = registry(dir.path(), store.clone());
        registry.discover().await.unwrap();
        registry.sync().await.unwrap();

        registry
            .update_record(
                &greet(),
                UpdateJobRecord {
                    enabled: Some(true),
                    queue: Some("fast".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        write(
            dir.path(),
            "greet.lua",
            &GREET.replace("Says hello", "Says hello politely"),
        );
        fs::remove_file(dir.path().join("gone.lua")).unwrap();
        registry.discover().await.unwrap();

        let report = registry.sync().await.unwrap();
        assert_eq!(report.updated, vec![greet()]);
        assert_eq!(report.removed.len(), 1);
        assert!(report.created.is_empty());

        let record = store.get_record(&greet()).await.unwrap().unwrap();
        assert_eq!(record.description.as_deref(), Some("Says hello politely"));
        assert!(record.enabled);
        assert_eq!(record.queue, "fast");
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.lua", GREET);
        let store = Arc::new(MemoryStore::new());
        let registry = registry(dir.path(), store.clone());
        registry.discover().await.unwrap();

        // Discovered but never synced
        assert!(matches!(
            registry.resolve(&greet()).await,
            Err(RegistryError::NotFound(_))
        ));

        registry.sync().await.unwrap();
        assert!(matches!(
            registry.resolve(&greet()).await,
            Err(RegistryError::Disabled(_))
        ));

        registry
            .update_record(
                &greet(),
                UpdateJobRecord {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (descriptor, record) = registry.resolve(&greet()).await.unwrap();
        assert_eq!(descriptor.meta.name, "Greet");
        assert!(record.enabled);

        let unknown = JobIdentity::new(SourceKind::Local, "greet", "Nope").unwrap();
        assert!(matches!(
            registry.resolve(&unknown).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overrides_can_be_cleared() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.lua", GREET);
        let store = Arc::new(MemoryStore::new());
        let registry = registry(dir.path(), store);
        registry.discover().await.unwrap();
        registry.sync().await.unwrap();

        let record = registry
            .update_record(
                &greet(),
                UpdateJobRecord {
                    name_override: Some("Say Hello".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.display_name(), "Say Hello");

        let record = registry
            .update_record(
                &greet(),
                UpdateJobRecord {
                    name_override: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.display_name(), "Greet");

        let jobs = registry.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_registration_errors_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.lua", GREET);
        write(dir.path(), "broken.lua", "jobs.register {");
        let registry = registry(dir.path(), Arc::new(MemoryStore::new()));

        assert_eq!(registry.discover().await.unwrap(), 1);
        assert_eq!(registry.errors().len(), 1);
    }
}
