//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a job was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Script tree under the configured local jobs root
    Local,
    /// Job tree of a synced external repository
    Git,
    /// Installed extension package
    Plugin,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Git => "git",
            SourceKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SourceKind::Local),
            "git" => Ok(SourceKind::Git),
            "plugin" => Ok(SourceKind::Plugin),
            other => Err(IdentityError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised while building or parsing a job identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("unknown source kind '{0}'")]
    UnknownKind(String),

    #[error("identity '{0}' must have the form kind.group.ClassName")]
    Malformed(String),

    #[error("invalid identity segment '{0}'")]
    InvalidSegment(String),
}

/// Stable identity of a job: `{kind}.{group}.{ClassName}`
///
/// The group is a dotted module path (`network.backup`). For git sources it
/// starts with the repository slug, for plugins with the package name. The
/// kind prefix keeps same-named classes from different sources apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobIdentity {
    kind: SourceKind,
    group: String,
    class_name: String,
}

impl JobIdentity {
    pub fn new(
        kind: SourceKind,
        group: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let group = group.into();
        let class_name = class_name.into();

        if group.is_empty() || !group.split('.').all(is_valid_segment) {
            return Err(IdentityError::InvalidSegment(group));
        }
        if !is_valid_segment(&class_name) {
            return Err(IdentityError::InvalidSegment(class_name));
        }

        Ok(Self {
            kind,
            group,
            class_name,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Key of the singleton lock guarding this job
    pub fn lock_key(&self) -> String {
        format!("drover:job_singleton:{}", self)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind, self.group, self.class_name)
    }
}

impl FromStr for JobIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once('.')
            .ok_or_else(|| IdentityError::Malformed(s.to_string()))?;
        let (group, class_name) = rest
            .rsplit_once('.')
            .ok_or_else(|| IdentityError::Malformed(s.to_string()))?;

        JobIdentity::new(kind.parse()?, group, class_name)
    }
}

impl Serialize for JobIdentity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Declared metadata of a job
///
/// Authored alongside the job's code; immutable once discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    pub name: String,
    pub description: Option<String>,
    pub grouping: Option<String>,
    #[serde(default)]
    pub approval_required: bool,
    /// Disables every form of argument persistence for this job
    #[serde(default)]
    pub sensitive_variables: bool,
    /// Forbids overlapping executions
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub hidden: bool,
    pub queue: Option<String>,
    /// Soft time limit in seconds
    pub soft_time_limit: Option<u64>,
    /// Hard time limit in seconds
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub field_order: Vec<String>,
}

impl JobMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            grouping: None,
            approval_required: false,
            sensitive_variables: false,
            singleton: false,
            hidden: false,
            queue: None,
            soft_time_limit: None,
            time_limit: None,
            field_order: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn grouping(mut self, grouping: impl Into<String>) -> Self {
        self.grouping = Some(grouping.into());
        self
    }

    pub fn approval_required(mut self) -> Self {
        self.approval_required = true;
        self
    }

    pub fn sensitive_variables(mut self) -> Self {
        self.sensitive_variables = true;
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn time_limits(mut self, soft: u64, hard: u64) -> Self {
        self.soft_time_limit = Some(soft);
        self.time_limit = Some(hard);
        self
    }

    pub fn field_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_order = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Durable record of a discoverable job
///
/// Created and refreshed only by an explicit registry sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub identity: JobIdentity,
    pub source: SourceKind,
    pub name: String,
    pub grouping: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub installed: bool,
    pub name_override: Option<String>,
    pub grouping_override: Option<String>,
    pub description_override: Option<String>,
    /// Queue executions are dispatched to
    pub queue: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn display_name(&self) -> &str {
        self.name_override.as_deref().unwrap_or(&self.name)
    }

    pub fn display_grouping(&self) -> &str {
        self.grouping_override.as_deref().unwrap_or(&self.grouping)
    }

    pub fn display_description(&self) -> Option<&str> {
        self.description_override
            .as_deref()
            .or(self.description.as_deref())
    }
}
