//! Log domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One structured log line of a job execution
///
/// Append-only; created during a single result's execution window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: Uuid,
    pub result_id: Uuid,
    /// Position in the result's log, in emission order
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Already redacted
    pub message: String,
    pub grouping: Option<String>,
    pub object: Option<ObjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Failure,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Failure => "failure",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "success" => Ok(LogLevel::Success),
            "warning" => Ok(LogLevel::Warning),
            "failure" => Ok(LogLevel::Failure),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Reference to a domain object owned by the surrounding data model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Model name, e.g. `dcim.device`
    pub model: String,
    pub id: Uuid,
    pub display: String,
}
