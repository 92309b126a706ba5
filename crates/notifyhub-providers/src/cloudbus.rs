//! Cloud-bus proxy providers: SES, SNS, GCP Pub/Sub, Azure Service Bus,
//! GCP IoT Core. None of these sign AWS/Azure/GCP requests; each emits the
//! shared webhook-proxy envelope (§6) to a user-supplied proxy URL that
//! holds the real cloud credentials.

use async_trait::async_trait;
use notifyhub_types::{NotifyError, Severity};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::proxy::{build_envelope, now_rfc3339, post_envelope};
use crate::registry::{EffectiveRequest, Provider, ProviderRegistry};
use crate::url::ParsedUrl;

pub(crate) fn register(registry: &mut ProviderRegistry) {
    registry.register("ses", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::Ses)?)));
    registry.register("sns", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::Sns)?)));
    registry.register("pubsub", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::PubSub)?)));
    registry.register("azuresb", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::AzureServiceBus)?)));
    registry.register("gcp-iot", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::GcpIot)?)));
    registry.register("gcp-pubsub", |p| Ok(std::sync::Arc::new(CloudBus::parse(p, CloudBusKind::GcpPubsub)?)));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloudBusKind {
    Ses,
    Sns,
    PubSub,
    AzureServiceBus,
    GcpIot,
    GcpPubsub,
}

impl CloudBusKind {
    fn service_id(self) -> &'static str {
        match self {
            CloudBusKind::Ses => "aws-ses",
            CloudBusKind::Sns => "aws-sns",
            CloudBusKind::PubSub => "pubsub",
            CloudBusKind::AzureServiceBus => "azure-service-bus",
            CloudBusKind::GcpIot => "gcp-iot",
            CloudBusKind::GcpPubsub => "gcp-pubsub",
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            CloudBusKind::Ses => "ses",
            CloudBusKind::Sns => "sns",
            CloudBusKind::PubSub => "pubsub",
            CloudBusKind::AzureServiceBus => "azuresb",
            CloudBusKind::GcpIot => "gcp-iot",
            CloudBusKind::GcpPubsub => "gcp-pubsub",
        }
    }

    fn max_body_length(self) -> usize {
        match self {
            CloudBusKind::Sns => 262144,
            _ => 0,
        }
    }
}

pub struct CloudBus {
    kind: CloudBusKind,
    proxy_url: String,
    proxy_key: Option<String>,
    topic_or_queue: String,
}

impl CloudBus {
    fn parse(p: &ParsedUrl, kind: CloudBusKind) -> Result<Self, NotifyError> {
        p.require_scheme(&[kind.scheme()])?;
        if p.host.is_empty() {
            return Err(NotifyError::invalid_configuration(format!("{}:// requires a proxy host", kind.scheme())));
        }
        let topic_or_queue = p
            .path_segments
            .first()
            .cloned()
            .ok_or_else(|| NotifyError::invalid_configuration(format!("{}:// requires a topic/queue path segment", kind.scheme())))?;

        let tls = p.query_get("tls").map(|v| v == "yes" || v == "true").unwrap_or(true);
        let scheme_http = if tls { "https" } else { "http" };
        let proxy_url = match p.port {
            Some(port) => format!("{scheme_http}://{}:{port}", p.host),
            None => format!("{scheme_http}://{}", p.host),
        };

        Ok(CloudBus {
            kind,
            proxy_url,
            proxy_key: p.query_get("proxy_key").map(str::to_string).or_else(|| p.secret.clone()),
            topic_or_queue,
        })
    }

    fn severity_attributes(severity: Severity) -> serde_json::Value {
        let text = match severity {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        json!({ "severity": text })
    }
}

#[async_trait]
impl Provider for CloudBus {
    fn service_id(&self) -> &'static str {
        self.kind.service_id()
    }

    fn max_body_length(&self) -> usize {
        self.kind.max_body_length()
    }

    fn truncates_with_ellipsis(&self) -> bool {
        self.kind == CloudBusKind::Sns
    }

    async fn send(&self, ctx: CancellationToken, request: &EffectiveRequest<'_>) -> Result<(), NotifyError> {
        let fields = json!({
            "topic": self.topic_or_queue,
            "title": request.title,
            "body": request.body,
            "attributes": Self::severity_attributes(request.severity),
        });
        let envelope = build_envelope(self.kind.service_id(), &now_rfc3339(), fields);
        post_envelope(self.kind.service_id(), &self.proxy_url, self.proxy_key.as_deref(), envelope, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sns_requires_topic_segment() {
        let p = ParsedUrl::parse("sns://proxy.example.com").unwrap();
        assert!(CloudBus::parse(&p, CloudBusKind::Sns).is_err());
    }

    #[test]
    fn sns_max_body_length_matches_capability_table() {
        let p = ParsedUrl::parse("sns://proxy.example.com/my-topic").unwrap();
        let c = CloudBus::parse(&p, CloudBusKind::Sns).unwrap();
        assert_eq!(c.max_body_length(), 262144);
    }

    #[test]
    fn proxy_url_defaults_to_https() {
        let p = ParsedUrl::parse("ses://proxy.example.com/queue").unwrap();
        let c = CloudBus::parse(&p, CloudBusKind::Ses).unwrap();
        assert!(c.proxy_url.starts_with("https://"));
    }

    #[test]
    fn only_sns_truncates_with_ellipsis() {
        let sns = ParsedUrl::parse("sns://proxy.example.com/my-topic").unwrap();
        assert!(CloudBus::parse(&sns, CloudBusKind::Sns).unwrap().truncates_with_ellipsis());

        let ses = ParsedUrl::parse("ses://proxy.example.com/queue").unwrap();
        assert!(!CloudBus::parse(&ses, CloudBusKind::Ses).unwrap().truncates_with_ellipsis());
    }

    #[test]
    fn tls_no_query_override_selects_plain_http() {
        let p = ParsedUrl::parse("azuresb://proxy.example.com/queue?tls=no").unwrap();
        let c = CloudBus::parse(&p, CloudBusKind::AzureServiceBus).unwrap();
        assert!(c.proxy_url.starts_with("http://"));
    }
}
