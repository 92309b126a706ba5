//! The `Dispatcher` (C4): owns the destination set, resolves per-destination
//! effective bodies, and fans a [`NotificationRequest`] out to every routed
//! destination concurrently.
//!
//! Translated from `engine_parallel.rs`'s wave-based `run_publish_level`
//! (chunked `std::thread::spawn`, `Arc<Mutex<_>>`-shared reporter) into one
//! `tokio::spawn` per destination per call, since §4.2 requires every
//! destination to run in parallel with no ordering guarantee between them —
//! there are no "waves" here, only one flat fan-out per `Notify`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use notifyhub_providers::{Destination, Provider, ProviderRegistry};
use notifyhub_types::{DeliveryError, ErrorKind, NotificationRequest, NotifyError, NotifyOutcome, NullReporter, Reporter};
use tokio_util::sync::CancellationToken;

use crate::Dispatch;

/// Runtime configuration for a [`Dispatcher`] instance.
pub struct DispatcherConfig {
    pub reporter: Arc<dyn Reporter>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig { reporter: Arc::new(NullReporter) }
    }
}

/// `Add`/`Notify`/`Close` (C4). Safe for concurrent use: the destination set
/// lives behind a `std::sync::RwLock` that is never held across a send —
/// `Notify` takes a read lock just long enough to clone the matching
/// destinations (an `Arc` bump each, per [`Destination`]'s `Clone`), then
/// drops it before spawning any task.
pub struct Dispatcher {
    registry: ProviderRegistry,
    destinations: RwLock<Vec<Destination>>,
    next_id: AtomicU64,
    reporter: Arc<dyn Reporter>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry, config: DispatcherConfig) -> Self {
        Dispatcher {
            registry,
            destinations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            reporter: config.reporter,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProviderRegistry::with_defaults(), DispatcherConfig::default())
    }

    /// Parse `url`, instantiate the matching provider, and register it as a
    /// new destination. Tags are read from the `tags` query parameter
    /// (comma-separated) when present; this is the one piece of routing
    /// metadata every destination URL grammar in this engine shares.
    pub fn add(&self, url: &str) -> Result<String, NotifyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifyError::new(ErrorKind::Internal, "dispatcher is closed"));
        }

        let (parsed, provider) = self.registry.build(url)?;
        let tags: BTreeSet<String> = parsed
            .query_get("tags")
            .map(|raw| raw.split(',').filter(|t| !t.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let id = format!("d{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let destination = Destination::new(id.clone(), provider).with_tags(tags);
        self.destinations.write().unwrap().push(destination);
        Ok(id)
    }

    /// Fan `request` out to its routed destinations, honoring `ctx`'s
    /// cancellation. Never short-circuits on the first failure.
    ///
    /// When `destination_urls` is non-empty, those URLs are resolved ad hoc
    /// (parsed and instantiated fresh, never added to the long-lived
    /// registry) and `tag_filter` is ignored — this is the path a
    /// self-contained scheduled job takes (§3's `destinationURLs` field).
    /// Otherwise, `request` routes against the pre-registered destination
    /// set, keeping only those whose tags intersect `tag_filter` (or all of
    /// them when it is empty).
    pub async fn notify(
        &self,
        ctx: CancellationToken,
        request: NotificationRequest,
        tag_filter: BTreeSet<String>,
        destination_urls: Vec<String>,
    ) -> NotifyOutcome {
        if destination_urls.is_empty() {
            let routed: Vec<Destination> = self
                .destinations
                .read()
                .unwrap()
                .iter()
                .filter(|d| d.matches_tag_filter(&tag_filter))
                .cloned()
                .collect();
            self.fan_out(ctx, request, routed).await
        } else {
            let (routed, mut parse_errors) = self.resolve_ad_hoc(&destination_urls);
            let mut outcome = self.fan_out(ctx, request, routed).await;
            outcome.total += parse_errors.len();
            outcome.failure_count += parse_errors.len();
            outcome.errors.append(&mut parse_errors);
            outcome
        }
    }

    /// Parse and instantiate each URL without registering it. A URL this
    /// engine cannot parse or has no provider for becomes a `DeliveryError`
    /// up front rather than a panic or a silently dropped destination.
    fn resolve_ad_hoc(&self, urls: &[String]) -> (Vec<Destination>, Vec<DeliveryError>) {
        let mut destinations = Vec::with_capacity(urls.len());
        let mut errors = Vec::new();
        for (i, url) in urls.iter().enumerate() {
            match self.registry.build(url) {
                Ok((_, provider)) => destinations.push(Destination::new(format!("adhoc{i}"), provider)),
                Err(e) => errors.push(DeliveryError::from(e)),
            }
        }
        (destinations, errors)
    }

    async fn fan_out(&self, ctx: CancellationToken, request: NotificationRequest, routed: Vec<Destination>) -> NotifyOutcome {
        let total = routed.len();
        let request = Arc::new(request);
        let mut handles = Vec::with_capacity(total);

        for destination in routed {
            let ctx = ctx.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move { send_one(ctx, &destination, &request).await }));
        }

        let mut success_count = 0;
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => success_count += 1,
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(DeliveryError {
                    destination_id: String::new(),
                    kind: ErrorKind::Internal,
                    message: format!("delivery task panicked: {join_err}"),
                }),
            }
        }

        let failure_count = errors.len();
        if failure_count > 0 {
            self.reporter.warn(&format!("{failure_count}/{total} deliveries failed"));
        }

        NotifyOutcome { total, success_count, failure_count, errors }
    }

    /// Idempotent: once closed, `add` fails and `notify` still drains
    /// whatever is registered (there is nothing in-flight to cancel here —
    /// that is the caller's `ctx`'s job).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.read().unwrap().len()
    }

    pub fn schemes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registry.schemes()
    }
}

async fn send_one(ctx: CancellationToken, destination: &Destination, request: &NotificationRequest) -> Result<(), DeliveryError> {
    if ctx.is_cancelled() {
        return Err(DeliveryError {
            destination_id: destination.id.clone(),
            kind: ErrorKind::ContextCanceled,
            message: "send canceled before it started".to_string(),
        });
    }

    if !request.attachments.is_empty() && !destination.provider.supports_attachments() {
        return Err(DeliveryError {
            destination_id: destination.id.clone(),
            kind: ErrorKind::PayloadRejected,
            message: format!("{} does not support attachments", destination.provider.service_id()),
        });
    }

    let limit = destination.provider.max_body_length();
    let owned_body;
    let body = if limit > 0 && request.body.len() > limit {
        owned_body = truncate_body(&request.body, limit, destination.provider.truncates_with_ellipsis());
        owned_body.as_str()
    } else {
        request.body.as_str()
    };

    let effective = notifyhub_providers::EffectiveRequest::from_request(request, body);
    destination
        .provider
        .send(ctx, &effective)
        .await
        .map_err(|e| DeliveryError::from(e.with_destination(destination.id.clone())))
}

/// Truncate `body` to at most `limit` bytes, cutting back further if needed
/// to land on a UTF-8 char boundary, appending `"..."` when `ellipsis` is
/// set and room allows it.
fn truncate_body(body: &str, limit: usize, ellipsis: bool) -> String {
    if body.len() <= limit {
        return body.to_string();
    }

    const MARK: &str = "...";
    let budget = if ellipsis && limit > MARK.len() { limit - MARK.len() } else { limit };

    let mut cut = budget.min(body.len());
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = body[..cut].to_string();
    if ellipsis && limit > MARK.len() {
        truncated.push_str(MARK);
    }
    truncated
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn notify(&self, request: NotificationRequest, tag_filter: BTreeSet<String>, destination_urls: Vec<String>) -> NotifyOutcome {
        Dispatcher::notify(self, CancellationToken::new(), request, tag_filter, destination_urls).await
    }
}
