//! Single-threaded, time-driven cron loop (§4.4). Owns nothing but the
//! shared queue state: on every tick it finds due [`ScheduledJob`]s, emits a
//! `QueuedJob` for each, advances `next_fire_at`, and persists.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use notifyhub_queue::{QueueState, QueueStore, ScheduledJob};
use notifyhub_types::NotifyError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Parse a standard 5-field (minute hour day-of-month month day-of-week)
/// cron expression and return its next occurrence strictly after `after`.
///
/// The underlying `cron` crate expects a leading seconds field; every
/// expression here is always fired "at second zero" of the matching
/// minute, so a `"0 "` prefix is prepended rather than exposing a 6-field
/// grammar to callers.
pub fn compute_next_fire(cron_expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, NotifyError> {
    let normalized = format!("0 {cron_expression}");
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| NotifyError::invalid_configuration(format!("invalid cron expression {cron_expression:?}: {e}")))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| NotifyError::invalid_configuration("cron expression has no future occurrence"))
}

/// Drives the cron half of C5. Constructed once per scheduler instance and
/// run as a single background task.
pub struct CronLoop {
    state: Arc<Mutex<QueueState>>,
    store: Arc<QueueStore>,
    default_max_attempts: u32,
}

impl CronLoop {
    pub fn new(state: Arc<Mutex<QueueState>>, store: Arc<QueueStore>, default_max_attempts: u32) -> Self {
        CronLoop { state, store, default_max_attempts }
    }

    /// Register or replace a scheduled job definition.
    pub async fn put_job(&self, job: ScheduledJob) {
        let mut state = self.state.lock().await;
        state.put_scheduled(job);
        let _ = self.store.save(&state);
    }

    /// One tick: emit a `QueuedJob` for every due, enabled job and advance
    /// its `next_fire_at`. Returns the number of jobs fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let due_ids: Vec<String> = state
            .scheduled_jobs
            .values()
            .filter(|j| j.is_due(now))
            .map(|j| j.id.clone())
            .collect();

        let mut fired = 0;
        for id in due_ids {
            let queued = {
                let job = state.scheduled_jobs.get(&id).expect("id came from this map");
                notifyhub_queue::QueuedJob::from_scheduled(job, self.default_max_attempts, now)
            };
            state.enqueue(queued);

            let job = state.scheduled_jobs.get_mut(&id).expect("id came from this map");
            job.last_fire_at = Some(now);
            match compute_next_fire(&job.cron_expression, now) {
                Ok(next) => job.next_fire_at = next,
                Err(_) => job.enabled = false,
            }
            fired += 1;
        }

        if fired > 0 {
            let _ = self.store.save(&state);
        }
        fired
    }

    /// Run the tick loop until `ctx` is cancelled, sleeping `interval`
    /// between ticks.
    pub async fn run(&self, ctx: CancellationToken, interval: Duration) {
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(interval) => {
                    self.tick(Utc::now()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn compute_next_fire_every_five_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 0).unwrap();
        let next = compute_next_fire("*/5 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn compute_next_fire_rejects_malformed_expression() {
        let err = compute_next_fire("not a cron", Utc::now()).unwrap_err();
        assert_eq!(err.kind, notifyhub_types::ErrorKind::InvalidConfiguration);
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_and_advances_next_fire() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let state = Arc::new(Mutex::new(QueueState::default()));
        let cron_loop = CronLoop::new(state.clone(), store, 3);

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let job = ScheduledJob::new("nightly", "*/5 * * * *", "hi", now);
        cron_loop.put_job(job.clone()).await;

        let fired = cron_loop.tick(now).await;
        assert_eq!(fired, 1);

        let state = state.lock().await;
        assert_eq!(state.queued_jobs.len(), 1);
        let updated = &state.scheduled_jobs[&job.id];
        assert_eq!(updated.next_fire_at, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
        assert_eq!(updated.last_fire_at, Some(now));
    }

    #[tokio::test]
    async fn tick_skips_disabled_jobs() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let state = Arc::new(Mutex::new(QueueState::default()));
        let cron_loop = CronLoop::new(state.clone(), store, 3);

        let now = Utc::now();
        let mut job = ScheduledJob::new("nightly", "*/5 * * * *", "hi", now);
        job.enabled = false;
        cron_loop.put_job(job).await;

        let fired = cron_loop.tick(now).await;
        assert_eq!(fired, 0);
    }
}
