//! Push-gateway providers: APNS and FCM. Both build a platform-native
//! payload (APS dictionary / FCM message with per-platform overrides)
//! inside the shared webhook-proxy envelope — signing the real push
//! credential (APNS JWT, FCM service account) stays in the proxy's hands.

use async_trait::async_trait;
use notifyhub_types::{NotifyError, Severity};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::proxy::{build_envelope, now_rfc3339, post_envelope};
use crate::registry::{EffectiveRequest, Provider, ProviderRegistry};
use crate::url::ParsedUrl;

pub(crate) fn register(registry: &mut ProviderRegistry) {
    registry.register("apns", |p| Ok(std::sync::Arc::new(Apns::parse(p)?)));
    registry.register("fcm", |p| Ok(std::sync::Arc::new(Fcm::parse(p)?)));
}

pub struct Apns {
    proxy_url: String,
    proxy_key: Option<String>,
    bundle_id: String,
    key_id: String,
    team_id: String,
    key_path: String,
}

impl Apns {
    fn parse(p: &ParsedUrl) -> Result<Self, NotifyError> {
        p.require_scheme(&["apns"])?;
        if p.host.is_empty() {
            return Err(NotifyError::invalid_configuration("apns:// requires a proxy host"));
        }
        let path = p.path_segments.join("/");
        let proxy_url = format!("https://{}/{}", p.host, path);

        let bundle_id = p.query_get("bundle_id").map(str::to_string).ok_or_else(|| NotifyError::invalid_configuration("apns:// requires bundle_id"))?;
        let key_id = p.query_get("key_id").map(str::to_string).ok_or_else(|| NotifyError::invalid_configuration("apns:// requires key_id"))?;
        let team_id = p.query_get("team_id").map(str::to_string).ok_or_else(|| NotifyError::invalid_configuration("apns:// requires team_id"))?;
        let key_path = p.query_get("key_path").map(str::to_string).ok_or_else(|| NotifyError::invalid_configuration("apns:// requires key_path"))?;

        Ok(Apns {
            proxy_url,
            proxy_key: p.query_get("proxy_key").map(str::to_string),
            bundle_id,
            key_id,
            team_id,
            key_path,
        })
    }

    fn interruption_level(severity: Severity) -> &'static str {
        match severity {
            Severity::Error => "critical",
            Severity::Warning => "time-sensitive",
            Severity::Info => "active",
            Severity::Success => "passive",
        }
    }

    fn priority_header(severity: Severity) -> &'static str {
        match severity {
            Severity::Error | Severity::Warning => "10",
            _ => "5",
        }
    }
}

#[async_trait]
impl Provider for Apns {
    fn service_id(&self) -> &'static str {
        "apns"
    }

    fn supports_attachments(&self) -> bool {
        true
    }

    fn max_body_length(&self) -> usize {
        4096
    }

    async fn send(&self, ctx: CancellationToken, request: &EffectiveRequest<'_>) -> Result<(), NotifyError> {
        let fields = json!({
            "authentication": {
                "method": "jwt",
                "key_id": self.key_id,
                "team_id": self.team_id,
                "key_path": self.key_path,
            },
            "bundle_id": self.bundle_id,
            "headers": {
                "apns-priority": Self::priority_header(request.severity),
                "apns-push-type": "alert",
            },
            "payload": {
                "aps": {
                    "alert": { "title": request.title, "body": request.body },
                    "interruption-level": Self::interruption_level(request.severity),
                    "sound": "default",
                },
            },
        });
        let envelope = build_envelope("apns", &now_rfc3339(), fields);
        post_envelope("apns", &self.proxy_url, self.proxy_key.as_deref(), envelope, &ctx).await
    }
}

pub struct Fcm {
    proxy_url: String,
    proxy_key: Option<String>,
    project_id: String,
    channel_id: String,
}

impl Fcm {
    fn parse(p: &ParsedUrl) -> Result<Self, NotifyError> {
        p.require_scheme(&["fcm"])?;
        if p.host.is_empty() {
            return Err(NotifyError::invalid_configuration("fcm:// requires a proxy host"));
        }
        let path = p.path_segments.join("/");
        let project_id = p
            .query_get("project_id")
            .map(str::to_string)
            .ok_or_else(|| NotifyError::invalid_configuration("fcm:// requires project_id"))?;
        Ok(Fcm {
            proxy_url: format!("https://{}/{}", p.host, path),
            proxy_key: p.query_get("proxy_key").map(str::to_string),
            project_id,
            channel_id: p.query_get("channel_id").map(str::to_string).unwrap_or_else(|| "default".to_string()),
        })
    }

    fn android_priority(severity: Severity) -> &'static str {
        match severity {
            Severity::Error | Severity::Warning => "high",
            _ => "normal",
        }
    }
}

#[async_trait]
impl Provider for Fcm {
    fn service_id(&self) -> &'static str {
        "fcm"
    }

    fn supports_attachments(&self) -> bool {
        true
    }

    fn max_body_length(&self) -> usize {
        4096
    }

    async fn send(&self, ctx: CancellationToken, request: &EffectiveRequest<'_>) -> Result<(), NotifyError> {
        let fields = json!({
            "project_id": self.project_id,
            "message": {
                "notification": { "title": request.title, "body": request.body },
                "android": {
                    "priority": Self::android_priority(request.severity),
                    "notification": { "channel_id": self.channel_id },
                },
            },
        });
        let envelope = build_envelope("fcm", &now_rfc3339(), fields);
        post_envelope("fcm", &self.proxy_url, self.proxy_key.as_deref(), envelope, &ctx).await
    }
}
