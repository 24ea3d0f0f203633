//! Job sources and explicit registration
//!
//! A job is only visible to Drover once its source passes it through
//! [`Registrar::register`] or [`Registrar::register_with`]. Every
//! registration is validated; invalid jobs are reported and skipped while
//! the rest of the source still loads.

use drover_core::domain::job::{IdentityError, JobIdentity, JobMeta, SourceKind};
use drover_core::domain::variable::VariableDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::descriptor::{JobDescriptor, JobFactory, TimeLimits};
use crate::job::{Job, JobClass};
use crate::schema::VariableSchema;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("cannot build identity for {class_name} in '{group}': {error}")]
    InvalidIdentity {
        group: String,
        class_name: String,
        error: IdentityError,
    },

    #[error("job {identity} is invalid: {}", .problems.join("; "))]
    Invalid {
        identity: JobIdentity,
        problems: Vec<String>,
    },

    #[error("job {0} is registered more than once; all copies were skipped")]
    DuplicateIdentity(JobIdentity),

    #[error("failed to load {path}: {message}")]
    Script { path: String, message: String },

    #[error("source '{source_name}' failed to load: {message}")]
    Source {
        source_name: String,
        message: String,
    },
}

/// Provider of job definitions
pub trait JobSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human readable name used in logs
    fn name(&self) -> &str;

    /// Prefix of every group registered by this source
    fn group_base(&self) -> Option<&str> {
        None
    }

    fn load(&self, registrar: &mut Registrar) -> anyhow::Result<()>;
}

/// Collects and validates the registrations of one source
pub struct Registrar {
    kind: SourceKind,
    base: Option<String>,
    defaults: TimeLimits,
    descriptors: Vec<JobDescriptor>,
    errors: Vec<RegistrationError>,
}

impl Registrar {
    pub fn new(kind: SourceKind, base: Option<String>, defaults: TimeLimits) -> Self {
        Self {
            kind,
            base,
            defaults,
            descriptors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Registers a compiled-in job type under `module`
    pub fn register<J: JobClass>(&mut self, module: &str) -> Option<JobIdentity> {
        let factory: JobFactory = Arc::new(|| -> Box<dyn Job> { Box::new(J::default()) });
        self.register_with(module, J::CLASS_NAME, J::meta(), J::variables(), factory)
    }

    /// Registers a job from its parts; returns its identity when valid
    pub fn register_with(
        &mut self,
        module: &str,
        class_name: &str,
        meta: JobMeta,
        variables: Vec<VariableDefinition>,
        factory: JobFactory,
    ) -> Option<JobIdentity> {
        let group = self.group_for(module);
        let identity = match JobIdentity::new(self.kind, group.clone(), class_name) {
            Ok(identity) => identity,
            Err(error) => {
                self.report(RegistrationError::InvalidIdentity {
                    group,
                    class_name: class_name.to_string(),
                    error,
                });
                return None;
            }
        };

        let limits = TimeLimits::resolve(&meta, self.defaults);
        let mut problems = Vec::new();
        if meta.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if limits.hard <= limits.soft {
            problems.push(format!(
                "time_limit ({}s) must be greater than soft_time_limit ({}s)",
                limits.hard.as_secs(),
                limits.soft.as_secs()
            ));
        }
        problems.extend(VariableSchema::new(&variables, &meta.field_order).problems());

        if !problems.is_empty() {
            self.report(RegistrationError::Invalid { identity, problems });
            return None;
        }

        self.descriptors.push(JobDescriptor {
            identity: identity.clone(),
            meta,
            variables,
            limits,
            factory,
        });
        Some(identity)
    }

    /// Records a problem found by the source itself
    pub fn report(&mut self, error: RegistrationError) {
        self.errors.push(error);
    }

    fn group_for(&self, module: &str) -> String {
        let module = module.trim_matches('.');
        match self.base.as_deref() {
            Some(base) if module.is_empty() => base.to_string(),
            Some(base) => format!("{}.{}", base, module),
            None => module.to_string(),
        }
    }
}

/// Result of loading a set of sources
#[derive(Debug, Default)]
pub struct Discovery {
    pub descriptors: Vec<JobDescriptor>,
    pub errors: Vec<RegistrationError>,
}

/// Loads every source, dropping jobs whose identity is not unique
pub fn discover(sources: &[Arc<dyn JobSource>], defaults: TimeLimits) -> Discovery {
    let mut discovery = Discovery::default();

    for source in sources {
        let mut registrar = Registrar::new(
            source.kind(),
            source.group_base().map(str::to_string),
            defaults,
        );
        if let Err(e) = source.load(&mut registrar) {
            registrar.report(RegistrationError::Source {
                source_name: source.name().to_string(),
                message: format!("{:#}", e),
            });
        }
        info!(
            "Loaded {} job(s) from {} source '{}'",
            registrar.descriptors.len(),
            source.kind(),
            source.name()
        );
        discovery.descriptors.append(&mut registrar.descriptors);
        discovery.errors.append(&mut registrar.errors);
    }

    let mut counts: HashMap<JobIdentity, usize> = HashMap::new();
    for descriptor in &discovery.descriptors {
        *counts.entry(descriptor.identity.clone()).or_default() += 1;
    }
    let mut duplicates: Vec<JobIdentity> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(identity, _)| identity)
        .collect();
    duplicates.sort();
    discovery
        .descriptors
        .retain(|d| !duplicates.contains(&d.identity));
    discovery.errors.extend(
        duplicates
            .into_iter()
            .map(RegistrationError::DuplicateIdentity),
    );

    for error in &discovery.errors {
        warn!("Skipped job registration: {}", error);
    }

    discovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::Arguments;
    use crate::context::JobContext;
    use async_trait::async_trait;
    use serde_json::Value;

    #[derive(Default)]
    struct Greet;

    #[async_trait]
    impl Job for Greet {
        async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    impl JobClass for Greet {
        const CLASS_NAME: &'static str = "Greet";

        fn meta() -> JobMeta {
            JobMeta::new("Greet")
        }

        fn variables() -> Vec<VariableDefinition> {
            vec![VariableDefinition::string("who").default("world")]
        }
    }

    #[derive(Default)]
    struct Broken;

    #[async_trait]
    impl Job for Broken {
        async fn run(&self, _ctx: &JobContext, _args: &Arguments) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    impl JobClass for Broken {
        const CLASS_NAME: &'static str = "Broken";

        fn meta() -> JobMeta {
            JobMeta::new("Broken").time_limits(60, 30)
        }
    }

    struct Extension {
        modules: Vec<&'static str>,
        fail: bool,
    }

    impl JobSource for Extension {
        fn kind(&self) -> SourceKind {
            SourceKind::Plugin
        }

        fn name(&self) -> &str {
            "demo"
        }

        fn group_base(&self) -> Option<&str> {
            Some("demo")
        }

        fn load(&self, registrar: &mut Registrar) -> anyhow::Result<()> {
            for module in &self.modules {
                registrar.register::<Greet>(module);
            }
            registrar.register::<Broken>("jobs");
            if self.fail {
                anyhow::bail!("extension crashed");
            }
            Ok(())
        }
    }

    fn defaults() -> TimeLimits {
        TimeLimits::from_secs(300, 600)
    }

    #[test]
    fn test_register_builds_identity_from_base_and_module() {
        let mut registrar = Registrar::new(SourceKind::Plugin, Some("demo".into()), defaults());
        let identity = registrar.register::<Greet>("network.backup").unwrap();
        assert_eq!(identity.to_string(), "plugin.demo.network.backup.Greet");

        let identity = registrar.register::<Greet>("").unwrap();
        assert_eq!(identity.to_string(), "plugin.demo.Greet");
    }

    #[test]
    fn test_invalid_jobs_are_skipped() {
        let sources: Vec<Arc<dyn JobSource>> = vec![Arc::new(Extension {
            modules: vec!["jobs"],
            fail: false,
        })];
        let discovery = discover(&sources, defaults());

        assert_eq!(discovery.descriptors.len(), 1);
        assert_eq!(
            discovery.descriptors[0].identity.to_string(),
            "plugin.demo.jobs.Greet"
        );
        assert_eq!(discovery.descriptors[0].limits, defaults());
        assert_eq!(discovery.errors.len(), 1);
        assert!(matches!(
            &discovery.errors[0],
            RegistrationError::Invalid { problems, .. } if problems[0].contains("time_limit")
        ));
    }

    #[test]
    fn test_duplicate_identities_are_dropped() {
        let sources: Vec<Arc<dyn JobSource>> = vec![
            Arc::new(Extension {
                modules: vec!["a", "b"],
                fail: false,
            }),
            Arc::new(Extension {
                modules: vec!["a"],
                fail: true,
            }),
        ];
        let discovery = discover(&sources, defaults());

        let identities: Vec<String> = discovery
            .descriptors
            .iter()
            .map(|d| d.identity.to_string())
            .collect();
        assert_eq!(identities, vec!["plugin.demo.b.Greet"]);
        assert!(discovery.errors.iter().any(|e| matches!(
            e,
            RegistrationError::DuplicateIdentity(id) if id.to_string() == "plugin.demo.a.Greet"
        )));
        assert!(
            discovery
                .errors
                .iter()
                .any(|e| matches!(e, RegistrationError::Source { .. }))
        );
    }
}
