//! N workers draining the durable queue (§4.4). Translated from a
//! chunked-concurrency thread-pool loop (one JoinHandle per item, drained in
//! `max_concurrent`-sized batches) into `tokio::spawn` tasks bound by a
//! semaphore, since every suspension point here is I/O (§5) rather than
//! CPU-bound work.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notifyhub_queue::{DeliveryRecord, JobPayload, QueueState, QueueStore, QueuedJob};
use notifyhub_retry::{calculate_delay, RetryStrategyConfig};
use notifyhub_types::{NotificationRequest, NotifyOutcome, Reporter};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatch;

/// Counters for the scheduler instance (§4.4's "metrics: counters only").
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub jobs_scheduled: AtomicU64,
    pub jobs_fired: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub jobs_failed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn queue_depth(&self, state: &QueueState) -> usize {
        state.queue_depth()
    }
}

pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub retry: RetryStrategyConfig,
    pub job_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8),
            retry: RetryStrategyConfig::default(),
            job_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WorkerPool {
    state: Arc<Mutex<QueueState>>,
    store: Arc<QueueStore>,
    dispatcher: Arc<dyn Dispatch>,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<SchedulerMetrics>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        state: Arc<Mutex<QueueState>>,
        store: Arc<QueueStore>,
        dispatcher: Arc<dyn Dispatch>,
        reporter: Arc<dyn Reporter>,
        metrics: Arc<SchedulerMetrics>,
        config: WorkerPoolConfig,
    ) -> Self {
        WorkerPool { state, store, dispatcher, reporter, metrics, config }
    }

    /// On startup: reset every `InFlight` row to `Pending`, preserving
    /// `attempt` (§4.4, §8's "scheduler at-least-once" property).
    pub async fn recover(&self) {
        let mut state = self.state.lock().await;
        let recovered = state.recover_in_flight(Utc::now());
        if recovered > 0 {
            self.reporter.info(&format!("recovered {recovered} in-flight job(s) to pending after restart"));
            let _ = self.store.save(&state);
        }
    }

    /// Claim and process at most one job. Returns `true` if a job was
    /// claimed (whether it ultimately succeeded or failed), `false` if the
    /// queue had nothing claimable.
    pub async fn run_once(&self) -> bool {
        let claimed = {
            let mut state = self.state.lock().await;
            let job = state.claim_next(Utc::now());
            if job.is_some() {
                let _ = self.store.save(&state);
            }
            job
        };

        let Some(job) = claimed else { return false };
        self.process(job).await;
        true
    }

    /// Run `worker_count` concurrent claim loops until `ctx` is cancelled.
    /// Each worker polls `run_once`, backing off briefly when the queue is
    /// empty so an idle scheduler doesn't spin.
    pub async fn run(&self, ctx: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.worker_count));
        let mut handles = Vec::new();

        for _ in 0..self.config.worker_count {
            let ctx = ctx.clone();
            let permits = permits.clone();
            // `spawn` requires 'static, so each worker gets its own clone of
            // the Arc-wrapped fields rather than borrowing `self`.
            let state = self.state.clone();
            let store = self.store.clone();
            let dispatcher = self.dispatcher.clone();
            let reporter = self.reporter.clone();
            let metrics = self.metrics.clone();
            let config_worker_count = self.config.worker_count;
            let retry = self.config.retry.clone();
            let job_timeout = self.config.job_timeout;

            let handle = tokio::spawn(async move {
                let worker = WorkerPool {
                    state,
                    store,
                    dispatcher,
                    reporter,
                    metrics,
                    config: WorkerPoolConfig { worker_count: config_worker_count, retry, job_timeout },
                };
                loop {
                    let _permit = permits.acquire().await;
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        claimed = worker.run_once() => {
                            if !claimed {
                                tokio::select! {
                                    _ = ctx.cancelled() => return,
                                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                                }
                            }
                        }
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn process(&self, job: QueuedJob) {
        let (request, tag_filter, destination_urls) = match render_request(&self.state, &job).await {
            Some(triple) => triple,
            None => {
                // The scheduled job this row referenced was deleted; there
                // is nothing left to deliver. Treat as a permanent failure
                // so the row doesn't spin forever.
                self.finish(&job, false, false, "referenced scheduled job no longer exists".to_string()).await;
                return;
            }
        };

        let timeout = self.config.job_timeout;
        let outcome = match tokio::time::timeout(timeout, self.dispatcher.notify(request, tag_filter, destination_urls)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.finish(&job, false, true, format!("job timed out after {timeout:?}")).await;
                return;
            }
        };

        if outcome.failure_count == 0 {
            self.finish(&job, true, false, String::new()).await;
            return;
        }

        let retryable = outcome.errors.iter().any(|e| e.kind.is_retryable());
        let message = summarize_errors(&outcome);
        self.finish(&job, false, retryable, message).await;
    }

    async fn finish(&self, job: &QueuedJob, success: bool, retryable: bool, message: String) {
        let now = Utc::now();

        if success {
            let mut state = self.state.lock().await;
            state.mark_done(&job.id, now);
            let _ = self.store.save(&state);
            self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            let next_attempt = job.attempt + 1;
            let next_retry_at = retryable.then(|| now + to_chrono(calculate_delay(&self.config.retry, next_attempt)));

            let mut state = self.state.lock().await;
            state.record_failure(&job.id, message.clone(), retryable, next_retry_at, now);
            let became_failed = matches!(state.queued_jobs.get(&job.id).map(|j| j.state), Some(notifyhub_queue::QueuedJobState::Failed));
            let _ = self.store.save(&state);
            drop(state);

            if became_failed {
                self.reporter.warn(&format!("job {} failed permanently: {message}", job.id));
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.metrics.jobs_retried.fetch_add(1, Ordering::Relaxed);
            }
        }

        let _ = self.store.append_delivery(&DeliveryRecord {
            queued_job_id: job.id.clone(),
            attempt: job.attempt + 1,
            timestamp: now,
            success,
            error: (!success).then_some(message),
        });
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

fn summarize_errors(outcome: &NotifyOutcome) -> String {
    outcome
        .errors
        .iter()
        .map(|e| format!("{}: {:?}: {}", e.destination_id, e.kind, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolve a `QueuedJob`'s payload into the `NotificationRequest`,
/// tag-filter, and destination-URL triple the dispatcher needs. A
/// `ScheduledRef` payload is looked up against the live scheduled-job table
/// (it may have been edited since the row was enqueued); `None` means the
/// reference no longer exists.
async fn render_request(state: &Arc<Mutex<QueueState>>, job: &QueuedJob) -> Option<(NotificationRequest, BTreeSet<String>, Vec<String>)> {
    match &job.payload {
        JobPayload::Inline { title, body, severity, destination_urls, tags } => {
            let request = NotificationRequest::new(body.clone())
                .with_title(title.clone())
                .with_severity(*severity);
            Some((request, tags.clone(), destination_urls.clone()))
        }
        JobPayload::ScheduledRef(id) => {
            let state = state.lock().await;
            let scheduled = state.scheduled_jobs.get(id)?;
            let request = NotificationRequest::new(scheduled.body.clone())
                .with_title(scheduled.title.clone())
                .with_severity(scheduled.severity);
            Some((request, scheduled.tags.clone(), scheduled.destination_urls.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::StubDispatch;
    use notifyhub_types::{DeliveryError, ErrorKind, NullReporter, Severity};

    fn sample_queue(job: QueuedJob) -> Arc<Mutex<QueueState>> {
        let mut state = QueueState::default();
        state.enqueue(job);
        Arc::new(Mutex::new(state))
    }

    fn inline_job(max_attempts: u32) -> QueuedJob {
        QueuedJob::new(
            JobPayload::Inline {
                title: "t".to_string(),
                body: "hi".to_string(),
                severity: Severity::Info,
                destination_urls: vec!["discord://a/b".to_string()],
                tags: BTreeSet::new(),
            },
            max_attempts,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn run_once_marks_done_on_full_success() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let job = inline_job(3);
        let job_id = job.id.clone();
        let state = sample_queue(job);

        let dispatcher = Arc::new(StubDispatch::new(vec![NotifyOutcome { total: 1, success_count: 1, failure_count: 0, errors: vec![] }]));
        let pool = WorkerPool::new(state.clone(), store, dispatcher, Arc::new(NullReporter), Arc::new(SchedulerMetrics::default()), WorkerPoolConfig::default());

        assert!(pool.run_once().await);
        let state = state.lock().await;
        assert_eq!(state.queued_jobs[&job_id].state, notifyhub_queue::QueuedJobState::Done);
    }

    #[tokio::test]
    async fn run_once_reschedules_on_retryable_failure() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let job = inline_job(3);
        let job_id = job.id.clone();
        let state = sample_queue(job);

        let dispatcher = Arc::new(StubDispatch::new(vec![NotifyOutcome {
            total: 1,
            success_count: 0,
            failure_count: 1,
            errors: vec![DeliveryError { destination_id: "d1".to_string(), kind: ErrorKind::TransientTransport, message: "timeout".to_string() }],
        }]));
        let pool = WorkerPool::new(state.clone(), store, dispatcher, Arc::new(NullReporter), Arc::new(SchedulerMetrics::default()), WorkerPoolConfig::default());

        assert!(pool.run_once().await);
        let state = state.lock().await;
        let row = &state.queued_jobs[&job_id];
        assert_eq!(row.state, notifyhub_queue::QueuedJobState::Pending);
        assert_eq!(row.attempt, 1);
        assert!(row.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn run_once_fails_immediately_on_permanent_error() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let job = inline_job(3);
        let job_id = job.id.clone();
        let state = sample_queue(job);

        let dispatcher = Arc::new(StubDispatch::new(vec![NotifyOutcome {
            total: 1,
            success_count: 0,
            failure_count: 1,
            errors: vec![DeliveryError { destination_id: "d1".to_string(), kind: ErrorKind::PermanentProtocol, message: "bad request".to_string() }],
        }]));
        let pool = WorkerPool::new(state.clone(), store, dispatcher, Arc::new(NullReporter), Arc::new(SchedulerMetrics::default()), WorkerPoolConfig::default());

        assert!(pool.run_once().await);
        let state = state.lock().await;
        assert_eq!(state.queued_jobs[&job_id].state, notifyhub_queue::QueuedJobState::Failed);
    }

    #[tokio::test]
    async fn run_once_returns_false_when_queue_empty() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let state = Arc::new(Mutex::new(QueueState::default()));
        let dispatcher = Arc::new(StubDispatch::new(vec![]));
        let pool = WorkerPool::new(state, store, dispatcher, Arc::new(NullReporter), Arc::new(SchedulerMetrics::default()), WorkerPoolConfig::default());

        assert!(!pool.run_once().await);
    }

    #[tokio::test]
    async fn recover_resets_in_flight_rows_to_pending() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(td.path()));
        let mut job = inline_job(3);
        job.state = notifyhub_queue::QueuedJobState::InFlight;
        job.attempt = 2;
        let job_id = job.id.clone();
        let state = sample_queue(job);

        let dispatcher = Arc::new(StubDispatch::new(vec![]));
        let pool = WorkerPool::new(state.clone(), store, dispatcher, Arc::new(NullReporter), Arc::new(SchedulerMetrics::default()), WorkerPoolConfig::default());

        pool.recover().await;
        let state = state.lock().await;
        let row = &state.queued_jobs[&job_id];
        assert_eq!(row.state, notifyhub_queue::QueuedJobState::Pending);
        assert_eq!(row.attempt, 2);
    }
}
