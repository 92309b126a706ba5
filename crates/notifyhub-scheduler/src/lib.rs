//! Cron loop + worker pool (C5's live half). [`notifyhub_queue`] owns the
//! durable row shapes; this crate owns the two cooperating loops that read
//! and write through them (§4.4).

mod cron_loop;
mod dispatch;
mod worker_pool;

pub use cron_loop::{compute_next_fire, CronLoop};
pub use dispatch::Dispatch;
pub use worker_pool::{SchedulerMetrics, WorkerPool, WorkerPoolConfig};
