//! Shared webhook-proxy envelope (§6, §9). Cloud-bus, push-gateway, and
//! some incident providers never hold cloud credentials themselves; they
//! POST a signed-by-nobody JSON envelope to a user-operated proxy that
//! holds the real AWS/Azure/GCP signing material out of process.

use notifyhub_types::{ErrorKind, NotifyError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::registry::{classify_http_status, classify_transport_error, map_cancellation, shared_client_pool};

/// Build the envelope body. `fields` are merged in alongside the fixed
/// top-level keys, letting each provider add its own payload shape without
/// re-deriving `service`/`timestamp`/`source`/`version`.
pub fn build_envelope(service: &str, timestamp_rfc3339: &str, fields: Value) -> Value {
    let mut envelope = json!({
        "service": service,
        "timestamp": timestamp_rfc3339,
        "source": "apprise-go",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut envelope, fields) {
        base.extend(extra);
    }
    envelope
}

pub fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string()
}

/// POST an envelope to `proxy_url`, attaching `Authorization: Bearer` and/or
/// `X-API-Key` when `proxy_key` is configured (§6: "one or both").
pub async fn post_envelope(
    service_id: &str,
    proxy_url: &str,
    proxy_key: Option<&str>,
    envelope: Value,
    ctx: &CancellationToken,
) -> Result<(), NotifyError> {
    if let Some(e) = map_cancellation(ctx) {
        return Err(e);
    }
    let client = shared_client_pool()
        .get_or_create(service_id, None)
        .map_err(|e| NotifyError::new(ErrorKind::Internal, e.to_string()))?;

    let mut builder = client.post(proxy_url).json(&envelope);
    if let Some(key) = proxy_key {
        builder = builder.header("Authorization", format!("Bearer {key}")).header("X-API-Key", key);
    }

    let response = tokio::select! {
        r = builder.send() => r.map_err(|e| classify_transport_error(&e))?,
        _ = ctx.cancelled() => return Err(NotifyError::new(ErrorKind::ContextCanceled, "send canceled")),
    };

    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    Err(NotifyError::new(classify_http_status(status), format!("proxy responded {status}: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_fixed_fields_and_merges_extra() {
        let env = build_envelope("aws-sns", "2024-01-01T00:00:00Z", json!({"topic_arn": "arn:x"}));
        assert_eq!(env["service"], "aws-sns");
        assert_eq!(env["source"], "apprise-go");
        assert_eq!(env["topic_arn"], "arn:x");
        assert!(env["version"].is_string());
    }

    #[test]
    fn now_rfc3339_produces_a_parseable_timestamp() {
        let ts = now_rfc3339();
        assert!(ts.contains('T'));
    }
}
