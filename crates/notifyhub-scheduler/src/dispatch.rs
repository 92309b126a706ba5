//! The seam between the scheduler (C5) and the dispatcher (C4). Spec §9
//! notes this is a DAG: the scheduler holds a reference to the dispatcher,
//! never the reverse. Expressing that as a trait here — rather than a
//! direct dependency on the `notifyhub` facade crate — keeps this crate
//! buildable and testable without the facade, and avoids a cyclic Cargo
//! dependency (the facade, in turn, depends on this crate to expose the
//! scheduler to callers).

use std::collections::BTreeSet;

use async_trait::async_trait;
use notifyhub_types::{NotificationRequest, NotifyOutcome};

/// Anything capable of fanning a [`NotificationRequest`] out to destinations
/// and aggregating the outcome. The `notifyhub` facade's `Dispatcher`
/// implements this; tests use a stub.
///
/// A job carries its own `destination_urls` (§3's `ScheduledJob`/`QueuedJob`
/// data model) alongside `tag_filter`. When `destination_urls` is non-empty
/// the implementation resolves and sends to exactly those URLs, ad hoc,
/// regardless of what is pre-registered; `tag_filter` only comes into play
/// for jobs with no explicit URLs of their own, routing against whatever
/// destinations the caller already `Add`ed.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn notify(&self, request: NotificationRequest, tag_filter: BTreeSet<String>, destination_urls: Vec<String>) -> NotifyOutcome;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A [`Dispatch`] stub that records every call and returns a
    /// caller-supplied outcome, for worker-pool tests that don't need a
    /// real provider registry.
    pub struct StubDispatch {
        pub outcomes: Mutex<Vec<NotifyOutcome>>,
        pub calls: AtomicUsize,
    }

    impl StubDispatch {
        pub fn new(outcomes: Vec<NotifyOutcome>) -> Self {
            StubDispatch { outcomes: Mutex::new(outcomes), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Dispatch for StubDispatch {
        async fn notify(&self, _request: NotificationRequest, _tag_filter: BTreeSet<String>, _destination_urls: Vec<String>) -> NotifyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                NotifyOutcome::default()
            } else {
                outcomes.remove(0)
            }
        }
    }
}
