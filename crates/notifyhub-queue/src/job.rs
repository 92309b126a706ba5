//! [`ScheduledJob`] and [`QueuedJob`] — the two row shapes the scheduler
//! persists (§3, §4.4).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use notifyhub_types::Severity;
use serde::{Deserialize, Serialize};

/// A cron-triggered job definition. Mutated only by the scheduler thread or
/// an explicit edit; the cron loop advances `next_fire_at` in place each
/// time it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub destination_urls: Vec<String>,
    pub tags: BTreeSet<String>,
    pub enabled: bool,
    pub next_fire_at: DateTime<Utc>,
    pub last_fire_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        body: impl Into<String>,
        next_fire_at: DateTime<Utc>,
    ) -> Self {
        ScheduledJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            title: String::new(),
            body: body.into(),
            severity: Severity::default(),
            destination_urls: Vec::new(),
            tags: BTreeSet::new(),
            enabled: true,
            next_fire_at,
            last_fire_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination_urls.push(url.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_at <= now
    }
}

/// The body of a [`QueuedJob`]: either a back-reference to the
/// [`ScheduledJob`] that produced it, or an inline payload for ad-hoc
/// enqueues that never had a cron job behind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPayload {
    ScheduledRef(String),
    Inline {
        title: String,
        body: String,
        severity: Severity,
        destination_urls: Vec<String>,
        tags: BTreeSet<String>,
    },
}

/// Lifecycle state of a [`QueuedJob`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedJobState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One row of the durable retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub payload: JobPayload,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub state: QueuedJobState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(payload: JobPayload, max_attempts: u32, now: DateTime<Utc>) -> Self {
        QueuedJob {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            attempt: 0,
            max_attempts,
            next_retry_at: None,
            state: QueuedJobState::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_scheduled(job: &ScheduledJob, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self::new(JobPayload::ScheduledRef(job.id.clone()), max_attempts, now)
    }

    /// Ready to be claimed: `Pending` and either never scheduled for retry
    /// or its retry delay has elapsed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == QueuedJobState::Pending && self.next_retry_at.map(|t| t <= now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_job_is_due_respects_enabled_flag() {
        let now = Utc::now();
        let job = ScheduledJob::new("nightly", "0 0 * * *", "hi", now).with_tag("ops");
        assert!(job.is_due(now));

        let mut disabled = job;
        disabled.enabled = false;
        assert!(!disabled.is_due(now));
    }

    #[test]
    fn scheduled_job_not_due_before_next_fire() {
        let now = Utc::now();
        let job = ScheduledJob::new("nightly", "0 0 * * *", "hi", now + chrono::Duration::hours(1));
        assert!(!job.is_due(now));
    }

    #[test]
    fn queued_job_from_scheduled_starts_pending_with_zero_attempts() {
        let now = Utc::now();
        let scheduled = ScheduledJob::new("nightly", "0 0 * * *", "hi", now);
        let queued = QueuedJob::from_scheduled(&scheduled, 6, now);
        assert_eq!(queued.attempt, 0);
        assert_eq!(queued.state, QueuedJobState::Pending);
        assert!(queued.is_claimable(now));
        assert!(matches!(queued.payload, JobPayload::ScheduledRef(ref id) if id == &scheduled.id));
    }

    #[test]
    fn queued_job_not_claimable_while_retry_pending() {
        let now = Utc::now();
        let mut job = QueuedJob::new(
            JobPayload::Inline {
                title: String::new(),
                body: "hi".to_string(),
                severity: Severity::Info,
                destination_urls: vec!["discord://a/b".to_string()],
                tags: BTreeSet::new(),
            },
            6,
            now,
        );
        job.next_retry_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(31)));
    }
}
