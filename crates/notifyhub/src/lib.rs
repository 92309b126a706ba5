//! # notifyhub
//!
//! A unified notification fan-out engine: one library call delivers a
//! logical notification concurrently to many heterogeneous destinations
//! addressed by URL strings (Discord/Slack/Telegram webhooks, SMTP, cloud
//! message buses, push/incident proxies, Twilio Voice, and more).
//!
//! ## Pipeline
//!
//! 1. [`dispatcher::Dispatcher::add`] parses a destination URL and
//!    instantiates its provider (C2 → C3).
//! 2. [`dispatcher::Dispatcher::notify`] resolves effective per-destination
//!    bodies, fans out concurrently, and aggregates the outcome (C4).
//! 3. [`scheduler::Scheduler`] optionally layers a cron loop and a durable
//!    retry queue on top of the same dispatcher (C5), for notifications
//!    that fire on a schedule or need at-least-once retry semantics.
//!
//! Attachments ([`notifyhub_attachment`]) and the destination-URL grammar
//! plus provider family ([`notifyhub_providers`]) are re-exported so most
//! callers need only this crate.
//!
//! ## Stability
//!
//! The library API is subject to change before v1.0.0.

mod dispatcher;
mod scheduler;

pub use notifyhub_scheduler::Dispatch;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use scheduler::{Scheduler, DEFAULT_TICK_INTERVAL};

pub use notifyhub_attachment::{Attachment, AttachmentError, AttachmentSet};
pub use notifyhub_providers::{Destination, EffectiveRequest, Provider, ProviderRegistry};
pub use notifyhub_queue::{JobPayload, QueuedJob, QueuedJobState, RenderedTemplate, ScheduledJob, Template};
pub use notifyhub_scheduler::WorkerPoolConfig;
pub use notifyhub_types::{
    BodyFormat, DeliveryError, ErrorKind, NotificationRequest, NotifyError, NotifyOutcome, NullReporter, Reporter, Severity,
};
