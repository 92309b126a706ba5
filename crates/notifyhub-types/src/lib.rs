//! # Types
//!
//! Core domain types shared across the dispatch and scheduling layers:
//! [`NotificationRequest`], the four-valued [`Severity`] enum, the error
//! taxonomy ([`NotifyError`] / [`ErrorKind`]), and the [`Reporter`] trait used
//! for library-internal diagnostics.
//!
//! ## Stability
//!
//! These types are considered stable unless otherwise noted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use notifyhub_attachment::{Attachment, AttachmentError, AttachmentSet};

/// The four-valued severity carried on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hint for how `body` is formatted; providers honor it where meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    #[default]
    Text,
    Markdown,
    Html,
}

/// The unit of logical intent handed to the dispatcher.
///
/// Immutable once constructed; the dispatcher never mutates a request in
/// place, it derives per-destination `EffectiveRequest` values (see
/// `notifyhub::dispatcher`).
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub body_format: BodyFormat,
    tags: BTreeSet<String>,
    pub url: Option<String>,
    pub attachments: AttachmentSet,
}

impl NotificationRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            body: body.into(),
            severity: Severity::default(),
            body_format: BodyFormat::default(),
            tags: BTreeSet::new(),
            url: None,
            attachments: AttachmentSet::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = format;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// True when `filter` is empty (match-all) or intersects this request's
    /// tag set.
    pub fn matches_tag_filter(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty() || self.tags.iter().any(|t| filter.contains(t))
    }
}

/// Error kind taxonomy. Distinguishes *why* a send failed so the scheduler
/// can decide whether to retry without re-deriving that decision from an
/// HTTP status code at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// URL parse failure, missing required fields, enum value out of range.
    /// Surfaced at `Add`; the destination is not registered.
    InvalidConfiguration,
    /// Destination returned an authentication failure (401/403 or
    /// equivalent). Not retried by the scheduler.
    CredentialRejected,
    /// DNS failure, connection refused, TLS handshake failure, timeout,
    /// 5xx, 408, 429. Scheduler retries with backoff.
    TransientTransport,
    /// 4xx other than 408/429, malformed provider response. Not retried.
    PermanentProtocol,
    /// Body too large after truncation, or attachment unsupported. Not
    /// retried.
    PayloadRejected,
    /// Deadline exceeded or explicit cancel. Scheduler treats as retryable
    /// once.
    ContextCanceled,
    /// Serialization or attachment I/O failure. Scheduler retries once.
    Internal,
}

impl ErrorKind {
    /// Whether the scheduler should retry a send that failed with this
    /// kind, given it has attempts remaining. `ContextCanceled` and
    /// `Internal` get exactly one retry in the scheduler's own bookkeeping,
    /// not an unbounded one — this only reports whether retrying is ever
    /// appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientTransport | ErrorKind::ContextCanceled | ErrorKind::Internal
        )
    }
}

/// The error type returned from `ParseURL` and `Send`.
///
/// `message` never interpolates raw credential material; providers format
/// using an already-redacted destination display, never the parsed URL.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct NotifyError {
    pub kind: ErrorKind,
    pub message: String,
    pub destination_id: Option<String>,
}

impl NotifyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            destination_id: None,
        }
    }

    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = Some(destination_id.into());
        self
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Per-destination outcome of one `Notify` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryError {
    pub destination_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<NotifyError> for DeliveryError {
    fn from(e: NotifyError) -> Self {
        DeliveryError {
            destination_id: e.destination_id.unwrap_or_default(),
            kind: e.kind,
            message: e.message,
        }
    }
}

/// Aggregate result of a single `Notify` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<DeliveryError>,
}

/// Library-internal diagnostics sink. No `tracing`/`log` dependency exists
/// anywhere in this engine; callers that want visibility implement this
/// trait (an interactive embedder can back it with `indicatif`, a service
/// can forward to its own logger).
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// A [`Reporter`] that discards everything. The default when the caller
/// supplies none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Mask a credential-bearing string for safe inclusion in error messages or
/// diagnostics (show first 4 and last 4 characters).
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        return "*".repeat(secret.len());
    }
    format!("{}****{}", &secret[..4], &secret[secret.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_serializes_snake_case() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }

    #[test]
    fn error_kind_retryability_matches_scheduler_contract() {
        assert!(ErrorKind::TransientTransport.is_retryable());
        assert!(ErrorKind::ContextCanceled.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::InvalidConfiguration.is_retryable());
        assert!(!ErrorKind::CredentialRejected.is_retryable());
        assert!(!ErrorKind::PermanentProtocol.is_retryable());
        assert!(!ErrorKind::PayloadRejected.is_retryable());
    }

    #[test]
    fn request_builder_sets_fields() {
        let req = NotificationRequest::new("hi")
            .with_title("t")
            .with_severity(Severity::Error)
            .with_tag("ops")
            .with_tag("prod");

        assert_eq!(req.body, "hi");
        assert_eq!(req.title, "t");
        assert_eq!(req.severity, Severity::Error);
        assert_eq!(req.tags().len(), 2);
    }

    #[test]
    fn tag_filter_empty_matches_everything() {
        let req = NotificationRequest::new("hi");
        assert!(req.matches_tag_filter(&BTreeSet::new()));
    }

    #[test]
    fn tag_filter_requires_intersection() {
        let req = NotificationRequest::new("hi").with_tag("ops");
        let mut filter = BTreeSet::new();
        filter.insert("dev".to_string());
        assert!(!req.matches_tag_filter(&filter));

        filter.insert("ops".to_string());
        assert!(req.matches_tag_filter(&filter));
    }

    #[test]
    fn tags_never_contain_duplicates() {
        let req = NotificationRequest::new("hi").with_tag("ops").with_tag("ops");
        assert_eq!(req.tags().len(), 1);
    }

    #[test]
    fn mask_secret_short_is_all_stars() {
        assert_eq!(mask_secret("abc"), "***");
    }

    #[test]
    fn mask_secret_long_shows_head_and_tail() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd****mnop");
    }

    #[test]
    fn notify_error_display_never_includes_destination_by_default() {
        let err = NotifyError::invalid_configuration("missing token");
        let rendered = err.to_string();
        assert!(rendered.contains("missing token"));
        assert!(!rendered.contains("destination_id"));
    }
}
