//! Scheduled job domain types
//!
//! A scheduled job durably holds a validated argument set until it is
//! approved, comes due, or both.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::job::JobIdentity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub job_identity: JobIdentity,
    /// Principal that submitted the run
    pub user: String,
    /// Re-serialized argument set
    pub kwargs: serde_json::Value,
    pub interval: ScheduleInterval,
    pub start_time: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
    pub approval_required: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn is_awaiting_approval(&self) -> bool {
        self.approval_required && self.approved_at.is_none()
    }

    /// Whether the scheduler should dispatch this entry at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_awaiting_approval() && self.start_time <= now
    }
}

/// How often a scheduled job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleInterval {
    Immediately,
    Future,
    Hourly,
    Daily,
    Weekly,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::Immediately => "immediately",
            ScheduleInterval::Future => "future",
            ScheduleInterval::Hourly => "hourly",
            ScheduleInterval::Daily => "daily",
            ScheduleInterval::Weekly => "weekly",
        }
    }

    /// Period between runs; `None` for one-off schedules
    pub fn period(&self) -> Option<Duration> {
        match self {
            ScheduleInterval::Immediately | ScheduleInterval::Future => None,
            ScheduleInterval::Hourly => Some(Duration::hours(1)),
            ScheduleInterval::Daily => Some(Duration::days(1)),
            ScheduleInterval::Weekly => Some(Duration::weeks(1)),
        }
    }

    /// Next start time strictly after `now`, or `None` for one-off schedules
    pub fn next_after(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let period = self.period()?;
        let mut next = start + period;
        while next <= now {
            next += period;
        }
        Some(next)
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediately" => Ok(ScheduleInterval::Immediately),
            "future" => Ok(ScheduleInterval::Future),
            "hourly" => Ok(ScheduleInterval::Hourly),
            "daily" => Ok(ScheduleInterval::Daily),
            "weekly" => Ok(ScheduleInterval::Weekly),
            other => Err(format!("unknown schedule interval '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::SourceKind;

    fn scheduled(interval: ScheduleInterval, approval_required: bool) -> ScheduledJob {
        let now = Utc::now();
        ScheduledJob {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            job_identity: JobIdentity::new(SourceKind::Local, "ops", "Backup").unwrap(),
            user: "alice".to_string(),
            kwargs: serde_json::json!({}),
            interval,
            start_time: now - Duration::minutes(1),
            last_run_at: None,
            total_run_count: 0,
            approval_required,
            approved_by: None,
            approved_at: None,
            enabled: true,
            created_at: now,
        }
    }

    #[test]
    fn test_due_requires_approval() {
        let now = Utc::now();
        let mut job = scheduled(ScheduleInterval::Future, true);
        assert!(!job.is_due(now));

        job.approved_by = Some("bob".to_string());
        job.approved_at = Some(now);
        assert!(job.is_due(now));

        job.enabled = false;
        assert!(!job.is_due(now));
    }

    #[test]
    fn test_next_after_skips_missed_periods() {
        let start = Utc::now() - Duration::hours(5) - Duration::minutes(30);
        let now = Utc::now();
        let next = ScheduleInterval::Hourly.next_after(start, now).unwrap();
        assert!(next > now);
        assert!(next - now <= Duration::hours(1));
        assert_eq!(ScheduleInterval::Future.next_after(start, now), None);
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!(
            "weekly".parse::<ScheduleInterval>().unwrap(),
            ScheduleInterval::Weekly
        );
        assert!("crontab".parse::<ScheduleInterval>().is_err());
    }
}
