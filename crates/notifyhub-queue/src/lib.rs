//! Persisted scheduled-job, retry-queue, and template store (C5's data
//! half). [`notifyhub_scheduler`] owns the cron loop and worker pool that
//! read and write through [`QueueStore`]; this crate only owns the shapes
//! and the durable state transitions, so the scheduler's concurrency
//! control and backoff policy stay out of this layer.

mod job;
mod store;
mod template;

pub use job::{JobPayload, QueuedJob, QueuedJobState, ScheduledJob};
pub use store::{deliveries_path, queue_path, DeliveryRecord, QueueState, QueueStore, DELIVERIES_FILE, QUEUE_FILE};
pub use template::{RenderedTemplate, Template};
