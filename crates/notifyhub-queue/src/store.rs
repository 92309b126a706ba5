//! Durable store for [`ScheduledJob`]/[`QueuedJob`] rows, plus an
//! append-only delivery log.
//!
//! Grounded in the save/load shape of a state-persistence module that writes
//! to a temp file and renames into place for atomicity, and in an
//! append-only JSONL event log for the delivery history. Encryption of the
//! on-disk payload is optional and transparent via
//! [`notifyhub_encrypt::QueueEncryption`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notifyhub_encrypt::QueueEncryption;
use serde::{Deserialize, Serialize};

use crate::job::{QueuedJob, QueuedJobState, ScheduledJob};

pub const QUEUE_FILE: &str = "queue.json";
pub const DELIVERIES_FILE: &str = "deliveries.jsonl";

pub fn queue_path(dir: &Path) -> PathBuf {
    dir.join(QUEUE_FILE)
}

pub fn deliveries_path(dir: &Path) -> PathBuf {
    dir.join(DELIVERIES_FILE)
}

/// The whole persisted world: every scheduled job definition and every
/// in-flight/pending/terminal queue row, keyed by id for O(1) claim/update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueState {
    pub scheduled_jobs: HashMap<String, ScheduledJob>,
    pub queued_jobs: HashMap<String, QueuedJob>,
}

impl QueueState {
    pub fn put_scheduled(&mut self, job: ScheduledJob) {
        self.scheduled_jobs.insert(job.id.clone(), job);
    }

    pub fn enqueue(&mut self, job: QueuedJob) -> String {
        let id = job.id.clone();
        self.queued_jobs.insert(id.clone(), job);
        id
    }

    /// Claim the oldest claimable row (by `created_at`), flipping it to
    /// `InFlight`. This is the in-memory half of the CAS §4.4 describes; the
    /// scheduler serializes calls through a single `Mutex<QueueState>` so the
    /// read-then-flip here is already atomic with respect to other workers.
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<QueuedJob> {
        let id = self
            .queued_jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .min_by_key(|j| j.created_at)
            .map(|j| j.id.clone())?;

        let job = self.queued_jobs.get_mut(&id)?;
        job.state = QueuedJobState::InFlight;
        job.updated_at = now;
        Some(job.clone())
    }

    pub fn mark_done(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(job) = self.queued_jobs.get_mut(id) {
            job.state = QueuedJobState::Done;
            job.last_error = None;
            job.updated_at = now;
        }
    }

    /// Record a failed attempt. `retryable` decides whether the job is
    /// rescheduled for another attempt (with `next_retry_at` supplied by the
    /// caller, who owns the backoff policy) or marked terminally `Failed`.
    pub fn record_failure(&mut self, id: &str, error: impl Into<String>, retryable: bool, next_retry_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let Some(job) = self.queued_jobs.get_mut(id) else { return };
        job.attempt += 1;
        job.last_error = Some(error.into());
        job.updated_at = now;

        if !retryable || job.attempt >= job.max_attempts {
            job.state = QueuedJobState::Failed;
            job.next_retry_at = None;
        } else {
            job.state = QueuedJobState::Pending;
            job.next_retry_at = next_retry_at;
        }
    }

    /// At-least-once recovery: every `InFlight` row survives a crash as
    /// `Pending` with `attempt` unchanged, so a restarted worker pool picks
    /// it back up (duplicates are the caller's responsibility per §8).
    pub fn recover_in_flight(&mut self, now: DateTime<Utc>) -> usize {
        let mut recovered = 0;
        for job in self.queued_jobs.values_mut() {
            if job.state == QueuedJobState::InFlight {
                job.state = QueuedJobState::Pending;
                job.next_retry_at = None;
                job.updated_at = now;
                recovered += 1;
            }
        }
        recovered
    }

    /// Retention: drop `Done` rows older than `retention`. `Failed` rows are
    /// kept until explicitly removed (§4.4).
    pub fn prune_done(&mut self, retention: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.queued_jobs.len();
        self.queued_jobs
            .retain(|_, job| !(job.state == QueuedJobState::Done && now - job.updated_at > retention));
        before - self.queued_jobs.len()
    }

    pub fn remove(&mut self, id: &str) -> Option<QueuedJob> {
        self.queued_jobs.remove(id)
    }

    pub fn queue_depth(&self) -> usize {
        self.queued_jobs
            .values()
            .filter(|j| matches!(j.state, QueuedJobState::Pending | QueuedJobState::InFlight))
            .count()
    }
}

/// One line of the append-only delivery log (`deliveries.jsonl`): a record
/// of what happened to a `QueuedJob` on a single worker attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub queued_job_id: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Persistence for [`QueueState`] plus the delivery audit log.
pub struct QueueStore {
    state_path: PathBuf,
    deliveries_path: PathBuf,
    encryption: QueueEncryption,
}

impl QueueStore {
    pub fn new(dir: &Path) -> Self {
        QueueStore::with_encryption(dir, QueueEncryption::new(Default::default()))
    }

    pub fn with_encryption(dir: &Path, encryption: QueueEncryption) -> Self {
        QueueStore {
            state_path: queue_path(dir),
            deliveries_path: deliveries_path(dir),
            encryption,
        }
    }

    /// Write-to-temp-then-rename, matching the atomicity of other
    /// state-persistence in this workspace; the encryption layer (if
    /// enabled) runs on the serialized bytes before the temp file is
    /// written.
    pub fn save(&self, state: &QueueState) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create queue dir {}", parent.display()))?;
        }

        let tmp_path = self.state_path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(state).context("failed to serialize queue state")?;
        let bytes = if self.encryption.is_enabled() {
            self.encryption.encrypt(&json).context("failed to encrypt queue state")?
        } else {
            json
        };

        fs::write(&tmp_path, bytes)
            .with_context(|| format!("failed to write queue file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.state_path)
            .with_context(|| format!("failed to rename queue file to {}", self.state_path.display()))?;

        Ok(())
    }

    pub fn load(&self) -> Result<QueueState> {
        if !self.state_path.exists() {
            return Ok(QueueState::default());
        }

        let raw = fs::read(&self.state_path)
            .with_context(|| format!("failed to read queue file {}", self.state_path.display()))?;
        let bytes = self.encryption.decrypt(&raw).context("failed to decrypt queue state")?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse queue JSON from {}", self.state_path.display()))
    }

    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }

    pub fn append_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        if let Some(parent) = self.deliveries_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create queue dir {}", parent.display()))?;
        }

        let line = serde_json::to_string(record).context("failed to serialize delivery record")?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.deliveries_path)
            .with_context(|| format!("failed to open deliveries file {}", self.deliveries_path.display()))?;

        use std::io::Write;
        writeln!(file, "{}", line)
            .with_context(|| format!("failed to write delivery record to {}", self.deliveries_path.display()))?;

        Ok(())
    }

    pub fn read_deliveries(&self) -> Result<Vec<DeliveryRecord>> {
        if !self.deliveries_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.deliveries_path)
            .with_context(|| format!("failed to read deliveries file {}", self.deliveries_path.display()))?;

        content
            .lines()
            .map(|line| {
                serde_json::from_str(line)
                    .with_context(|| format!("failed to parse delivery record from line: {line}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPayload;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn sample_job(now: DateTime<Utc>) -> QueuedJob {
        QueuedJob::new(
            JobPayload::Inline {
                title: String::new(),
                body: "hi".to_string(),
                severity: notifyhub_types::Severity::Info,
                destination_urls: vec!["discord://a/b".to_string()],
                tags: BTreeSet::new(),
            },
            3,
            now,
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let td = tempdir().unwrap();
        let store = QueueStore::new(td.path());

        let mut state = QueueState::default();
        let now = Utc::now();
        let job = sample_job(now);
        let id = state.enqueue(job);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.queued_jobs.contains_key(&id));
    }

    #[test]
    fn load_missing_file_returns_default() {
        let td = tempdir().unwrap();
        let store = QueueStore::new(td.path());
        let state = store.load().unwrap();
        assert!(state.queued_jobs.is_empty());
    }

    #[test]
    fn claim_next_flips_oldest_claimable_to_in_flight() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let job = sample_job(now);
        let id = state.enqueue(job);

        let claimed = state.claim_next(now).unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, QueuedJobState::InFlight);
        assert!(state.claim_next(now).is_none());
    }

    #[test]
    fn record_failure_reschedules_when_retryable_and_under_max_attempts() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let job = sample_job(now);
        let id = state.enqueue(job);
        state.claim_next(now);

        state.record_failure(&id, "timeout", true, Some(now + chrono::Duration::seconds(5)), now);
        let job = &state.queued_jobs[&id];
        assert_eq!(job.state, QueuedJobState::Pending);
        assert_eq!(job.attempt, 1);
        assert!(job.next_retry_at.is_some());
    }

    #[test]
    fn record_failure_marks_failed_after_max_attempts() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let mut job = sample_job(now);
        job.max_attempts = 1;
        let id = state.enqueue(job);
        state.claim_next(now);

        state.record_failure(&id, "denied", true, None, now);
        assert_eq!(state.queued_jobs[&id].state, QueuedJobState::Failed);
    }

    #[test]
    fn record_failure_marks_failed_immediately_when_not_retryable() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let job = sample_job(now);
        let id = state.enqueue(job);
        state.claim_next(now);

        state.record_failure(&id, "bad config", false, None, now);
        assert_eq!(state.queued_jobs[&id].state, QueuedJobState::Failed);
        assert_eq!(state.queued_jobs[&id].attempt, 1);
    }

    #[test]
    fn recover_in_flight_resets_to_pending_preserving_attempt() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let mut job = sample_job(now);
        job.attempt = 2;
        job.state = QueuedJobState::InFlight;
        let id = state.enqueue(job);

        let recovered = state.recover_in_flight(now);
        assert_eq!(recovered, 1);
        assert_eq!(state.queued_jobs[&id].state, QueuedJobState::Pending);
        assert_eq!(state.queued_jobs[&id].attempt, 2);
    }

    #[test]
    fn prune_done_drops_only_old_done_rows() {
        let mut state = QueueState::default();
        let now = Utc::now();
        let mut done_old = sample_job(now - chrono::Duration::days(10));
        done_old.state = QueuedJobState::Done;
        done_old.updated_at = now - chrono::Duration::days(10);
        let old_id = state.enqueue(done_old);

        let mut done_recent = sample_job(now);
        done_recent.state = QueuedJobState::Done;
        done_recent.updated_at = now;
        let recent_id = state.enqueue(done_recent);

        let pruned = state.prune_done(chrono::Duration::days(7), now);
        assert_eq!(pruned, 1);
        assert!(!state.queued_jobs.contains_key(&old_id));
        assert!(state.queued_jobs.contains_key(&recent_id));
    }

    #[test]
    fn append_and_read_deliveries_round_trips() {
        let td = tempdir().unwrap();
        let store = QueueStore::new(td.path());

        let record = DeliveryRecord {
            queued_job_id: "abc".to_string(),
            attempt: 1,
            timestamp: Utc::now(),
            success: true,
            error: None,
        };
        store.append_delivery(&record).unwrap();
        store.append_delivery(&record).unwrap();

        let records = store.read_deliveries().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn queue_depth_counts_pending_and_in_flight_only() {
        let mut state = QueueState::default();
        let now = Utc::now();
        state.enqueue(sample_job(now));
        let in_flight_id = state.enqueue(sample_job(now));
        state.queued_jobs.get_mut(&in_flight_id).unwrap().state = QueuedJobState::InFlight;
        let mut done = sample_job(now);
        done.state = QueuedJobState::Done;
        state.enqueue(done);

        assert_eq!(state.queue_depth(), 2);
    }
}
