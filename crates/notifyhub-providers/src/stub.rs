//! Stub providers: schemes the registry recognizes and parses losslessly
//! (so callers can list/display configured destinations) but that do not
//! implement a real send yet. Per §9's open question, the pack's own stub
//! constructors for fully-implemented services were dropped rather than
//! preserved — these stubs cover only schemes with no implementation at
//! all, not placeholders shadowing a real provider.

use async_trait::async_trait;
use notifyhub_types::{ErrorKind, NotifyError};
use tokio_util::sync::CancellationToken;

use crate::registry::{EffectiveRequest, Provider, ProviderRegistry};
use crate::url::ParsedUrl;

pub(crate) fn register(registry: &mut ProviderRegistry) {
    registry.register("linkedin", |p| Ok(std::sync::Arc::new(StubProvider::from_parsed("linkedin", p)?)));
    registry.register("instagram", |p| Ok(std::sync::Arc::new(StubProvider::from_parsed("instagram", p)?)));
    registry.register("ifttt", |p| Ok(std::sync::Arc::new(StubProvider::from_parsed("ifttt", p)?)));
    registry.register("polly", |p| Ok(std::sync::Arc::new(StubProvider::from_parsed("polly", p)?)));
}

/// A provider that parses its URL (validating at least the scheme and that
/// required credential positions are present) but whose `send` always
/// fails with `Internal` ("not implemented"). LinkedIn's three-way chained
/// secret (`client_id:client_secret:access_token`) is still decomposed and
/// kept so a caller inspecting the destination sees it was parsed, not
/// silently dropped.
pub struct StubProvider {
    service_id: &'static str,
    raw: String,
    #[allow(dead_code)]
    chained_secrets: Vec<String>,
}

impl StubProvider {
    pub fn new(service_id: &'static str) -> Self {
        StubProvider { service_id, raw: String::new(), chained_secrets: Vec::new() }
    }

    fn from_parsed(service_id: &'static str, p: &ParsedUrl) -> Result<Self, NotifyError> {
        p.require_scheme(&[service_id])?;
        Ok(StubProvider {
            service_id,
            raw: p.as_str().to_string(),
            chained_secrets: p.chained_secrets(),
        })
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn service_id(&self) -> &'static str {
        self.service_id
    }

    fn test_url(&self, url: &str) -> bool {
        ParsedUrl::parse(url).map(|p| p.scheme == self.service_id).unwrap_or(false)
    }

    fn truncates_with_ellipsis(&self) -> bool {
        self.service_id == "polly"
    }

    async fn send(&self, _ctx: CancellationToken, _request: &EffectiveRequest<'_>) -> Result<(), NotifyError> {
        Err(NotifyError::new(
            ErrorKind::Internal,
            format!("{} is not implemented ({})", self.service_id, if self.raw.is_empty() { "no URL" } else { "send unsupported" }),
        ))
    }
}
