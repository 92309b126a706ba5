//! Small helpers shared by more than one provider family that don't belong
//! to any single one of them.

use base64::Engine;
use serde_json::{json, Value};

/// HTTP Basic auth value (the part after `Basic `), base64 of `user:pass`.
pub fn basic_auth(user: &str, pass: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
}

/// Wrap plain text in the minimal Atlassian Document Format paragraph shape
/// Jira's v3 API requires instead of a plain string body.
pub fn adf_paragraph(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": text }],
        }],
    })
}
