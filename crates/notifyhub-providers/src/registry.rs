//! `Provider` trait, `Destination`, and the scheme-keyed factory table (C2 +
//! C3). Mirrors `RegistryClient`'s "one client per instance" shape at the
//! level above: here the keyed thing is a provider constructor rather than
//! an HTTP client, but the rule is the same — a `HashMap` built once at
//! registry construction, no reflection, no dynamic plugin loading.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use notifyhub_attachment::AttachmentSet;
use notifyhub_http::ClientPool;
use notifyhub_types::{ErrorKind, NotificationRequest, NotifyError, Severity};
use tokio_util::sync::CancellationToken;

use crate::url::ParsedUrl;

/// Process-wide client pool shared by every provider family. One
/// `reqwest::Client` per service ID, never one per destination — the pool
/// itself already guards against holding a lock across I/O (see
/// `notifyhub-http`).
static HTTP_POOL: OnceLock<ClientPool> = OnceLock::new();

pub fn shared_client_pool() -> &'static ClientPool {
    HTTP_POOL.get_or_init(ClientPool::default)
}

/// The per-destination request a `Send` implementation actually receives:
/// the dispatcher has already resolved body truncation and tag filtering,
/// so providers see one ready-to-serialize payload.
#[derive(Debug, Clone)]
pub struct EffectiveRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub severity: Severity,
    pub url: Option<&'a str>,
    pub attachments: &'a AttachmentSet,
}

impl<'a> EffectiveRequest<'a> {
    pub fn from_request(request: &'a NotificationRequest, body: &'a str) -> Self {
        EffectiveRequest {
            title: &request.title,
            body,
            severity: request.severity,
            url: request.url.as_deref(),
            attachments: &request.attachments,
        }
    }
}

/// Capability set every provider describes about itself, per §4.1.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used as the registry key and in diagnostics (e.g.
    /// `"discord"`, `"apns"`). Never the URL scheme verbatim when a family
    /// answers to more than one scheme (`mailto`/`mailtos` both -> `"email"`).
    fn service_id(&self) -> &'static str;

    fn default_port(&self) -> Option<u16> {
        None
    }

    fn supports_attachments(&self) -> bool {
        false
    }

    /// 0 means unbounded.
    fn max_body_length(&self) -> usize {
        0
    }

    /// Whether this provider's convention is to append an ellipsis when the
    /// dispatcher truncates a body to `max_body_length` (SNS, Polly: yes;
    /// generic webhooks: no, they just cut the string).
    fn truncates_with_ellipsis(&self) -> bool {
        false
    }

    /// Re-validate a URL this provider already parsed without mutating any
    /// state — used by callers that want a cheap second opinion before
    /// persisting a destination (e.g. a UI form).
    fn test_url(&self, url: &str) -> bool {
        ParsedUrl::parse(url).is_ok()
    }

    async fn send(&self, ctx: CancellationToken, request: &EffectiveRequest<'_>) -> Result<(), NotifyError>;
}

/// A factory turns a parsed URL into a boxed provider instance. Registered
/// once per scheme at process start; never invoked via reflection.
pub type ProviderFactory = fn(&ParsedUrl) -> Result<Arc<dyn Provider>, NotifyError>;

/// A configured provider instance, produced by `Add(url)`. Immutable after
/// construction; destroyed with its owning dispatcher. `Clone` is cheap (an
/// `Arc` bump) and is what lets `Notify` copy the destination set out from
/// under its lock before fanning out sends (§4.2).
#[derive(Clone)]
pub struct Destination {
    pub id: String,
    pub provider: Arc<dyn Provider>,
    pub tags: BTreeSet<String>,
}

impl Destination {
    pub fn new(id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Destination {
            id: id.into(),
            provider,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn matches_tag_filter(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty() || self.tags.iter().any(|t| filter.contains(t))
    }
}

/// Maps URL scheme -> provider factory. Built once via [`ProviderRegistry::with_defaults`]
/// and shared read-only thereafter; registering a new scheme after construction
/// is supported for embedders that add custom providers, but the default set
/// never needs it.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<&'static str, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        ProviderRegistry { factories: HashMap::new() }
    }

    pub fn register(&mut self, scheme: &'static str, factory: ProviderFactory) {
        self.factories.insert(scheme, factory);
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        crate::chat::register(&mut registry);
        crate::email::register(&mut registry);
        crate::cloudbus::register(&mut registry);
        crate::push::register(&mut registry);
        crate::incident::register(&mut registry);
        crate::voice::register(&mut registry);
        crate::stub::register(&mut registry);
        registry
    }

    /// Parse `raw` and instantiate the matching provider. This is the whole
    /// of `Add`'s C2 -> C3 half.
    pub fn build(&self, raw: &str) -> Result<(ParsedUrl, Arc<dyn Provider>), NotifyError> {
        let parsed = ParsedUrl::parse(raw)?;
        let factory = self.factories.get(parsed.scheme.as_str()).ok_or_else(|| {
            NotifyError::invalid_configuration(format!("no provider registered for scheme {:?}", parsed.scheme))
        })?;
        let provider = factory(&parsed)?;
        Ok((parsed, provider))
    }

    pub fn schemes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Classify a completed HTTP response into the §7 error taxonomy. Shared by
/// every webhook-shaped provider so status-code mapping lives in one place.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::CredentialRejected,
        408 | 429 => ErrorKind::TransientTransport,
        500..=599 => ErrorKind::TransientTransport,
        400..=499 => ErrorKind::PermanentProtocol,
        _ => ErrorKind::Internal,
    }
}

/// Map a `reqwest::Error` (connect/timeout/dns/tls) to a `TransientTransport`
/// kind and a message with no embedded credential material (reqwest already
/// scrubs userinfo from its own error Display).
pub fn classify_transport_error(err: &reqwest::Error) -> NotifyError {
    if err.is_timeout() {
        NotifyError::new(ErrorKind::TransientTransport, "request timed out")
    } else if err.is_connect() {
        NotifyError::new(ErrorKind::TransientTransport, format!("connection failed: {err}"))
    } else {
        NotifyError::new(ErrorKind::TransientTransport, format!("transport error: {err}"))
    }
}

pub(crate) fn map_cancellation(ctx: &CancellationToken) -> Option<NotifyError> {
    if ctx.is_cancelled() {
        Some(NotifyError::new(ErrorKind::ContextCanceled, "send canceled"))
    } else {
        None
    }
}
