//! Wires the durable queue, cron loop, and worker pool from
//! `notifyhub-queue`/`notifyhub-scheduler` to a concrete [`Dispatcher`] (C4
//! + C5 together). This is the one cohesive handle an embedder needs;
//! `notifyhub-scheduler` itself stays dispatcher-agnostic (see its
//! `Dispatch` trait) so it has no knowledge of this crate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notifyhub_queue::{QueueState, QueueStore, ScheduledJob};
use notifyhub_scheduler::{CronLoop, SchedulerMetrics, WorkerPool, WorkerPoolConfig};
use notifyhub_types::{NullReporter, Reporter};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Dispatcher;

/// Tick interval for the cron loop's own `select!` wakeups. One second is
/// plenty for minute-granularity cron expressions; a shorter interval only
/// matters for scheduler tests that can't wait a full minute.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the persisted queue plus both scheduler loops, running against one
/// [`Dispatcher`]. Construct once per process; `run` drives both loops
/// until cancelled.
pub struct Scheduler {
    state: Arc<Mutex<QueueState>>,
    store: Arc<QueueStore>,
    cron_loop: CronLoop,
    worker_pool: WorkerPool,
    metrics: Arc<SchedulerMetrics>,
    tick_interval: Duration,
}

impl Scheduler {
    /// Load (or initialize) persisted state from `dir` and wire both loops
    /// against `dispatcher`.
    pub fn new(dir: &Path, dispatcher: Arc<Dispatcher>, config: WorkerPoolConfig) -> anyhow::Result<Self> {
        Self::with_reporter(dir, dispatcher, config, Arc::new(NullReporter))
    }

    pub fn with_reporter(dir: &Path, dispatcher: Arc<Dispatcher>, config: WorkerPoolConfig, reporter: Arc<dyn Reporter>) -> anyhow::Result<Self> {
        let store = Arc::new(QueueStore::new(dir));
        let loaded = store.load()?;
        let default_max_attempts = config.retry.max_attempts;
        let state = Arc::new(Mutex::new(loaded));
        let metrics = Arc::new(SchedulerMetrics::default());

        let cron_loop = CronLoop::new(state.clone(), store.clone(), default_max_attempts);
        let worker_pool = WorkerPool::new(state.clone(), store.clone(), dispatcher, reporter, metrics.clone(), config);

        Ok(Scheduler { state, store, cron_loop, worker_pool, metrics, tick_interval: DEFAULT_TICK_INTERVAL })
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub async fn put_job(&self, job: ScheduledJob) {
        self.cron_loop.put_job(job).await;
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub async fn queue_depth(&self) -> usize {
        self.metrics.queue_depth(&*self.state.lock().await)
    }

    /// Run the cron loop and worker pool concurrently until `ctx` is
    /// cancelled. Recovers any `InFlight` rows left over from a previous
    /// run before starting the worker pool.
    pub async fn run(&self, ctx: CancellationToken) {
        self.worker_pool.recover().await;
        tokio::join!(
            self.cron_loop.run(ctx.clone(), self.tick_interval),
            self.worker_pool.run(ctx),
        );
    }

    /// One cron tick plus one worker-pool drain pass, for callers that want
    /// to step the scheduler manually (tests, a CLI `--once` flag) instead
    /// of running the background loops.
    pub async fn tick_once(&self) -> usize {
        let fired = self.cron_loop.tick(Utc::now()).await;
        while self.worker_pool.run_once().await {}
        fired
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DispatcherConfig;
    use notifyhub_providers::ProviderRegistry;

    #[tokio::test]
    async fn put_job_then_tick_once_drains_the_queue() {
        let td = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(ProviderRegistry::with_defaults(), DispatcherConfig::default()));
        let scheduler = Scheduler::new(td.path(), dispatcher, WorkerPoolConfig::default()).unwrap();

        // No destination_urls and no tags: at fire time this routes to
        // zero destinations, which the dispatcher reports as a clean
        // (empty) success rather than a failure.
        let job = ScheduledJob::new("nightly", "* * * * *", "hi", Utc::now());
        scheduler.put_job(job).await;

        let fired = scheduler.tick_once().await;
        assert_eq!(fired, 1);
        assert_eq!(scheduler.queue_depth().await, 0);
        assert_eq!(scheduler.metrics().jobs_succeeded.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn scheduler_reloads_persisted_state_on_restart() {
        let td = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(ProviderRegistry::with_defaults(), DispatcherConfig::default()));

        {
            let scheduler = Scheduler::new(td.path(), dispatcher.clone(), WorkerPoolConfig::default()).unwrap();
            let job = ScheduledJob::new("nightly", "0 0 1 1 *", "hi", Utc::now() + chrono::Duration::days(365));
            scheduler.put_job(job).await;
        }

        let reloaded = Scheduler::new(td.path(), dispatcher, WorkerPoolConfig::default()).unwrap();
        let state = reloaded.state.lock().await;
        assert_eq!(state.scheduled_jobs.len(), 1);
    }
}
