//! URL parsing shared by every provider.
//!
//! Destination URLs follow one grammar:
//! `<scheme>://[<user>[:<secret>]@]<host>[:<port>][/<seg>…][?<key>=<value>…]`.
//! [`ParsedUrl`] holds the pieces; [`UrlCursor`] walks the state machine in
//! §4.1 (`INITIAL -> VALIDATE_SCHEME -> EXTRACT_AUTH -> EXTRACT_ROUTING ->
//! APPLY_QUERY_OVERRIDES -> VALIDATE_ENUMS -> READY`) so every provider's
//! `parse_url` reads the same way instead of re-deriving the split logic.

use std::collections::BTreeMap;

use notifyhub_types::NotifyError;
use ::url::Url;

/// A destination URL, split into the fields every provider's `ParseURL`
/// contract needs. Built once per `Add` call and handed to the matching
/// provider factory.
#[derive(Debug, Clone)]
pub struct ParsedUrl {
    pub scheme: String,
    pub user: Option<String>,
    pub secret: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path_segments: Vec<String>,
    pub query: BTreeMap<String, Vec<String>>,
    raw: String,
}

impl ParsedUrl {
    /// Parse a raw destination URL. Fails with `InvalidConfiguration` on
    /// anything `url::Url` itself rejects (missing scheme, bad percent
    /// escape, empty host where one is required by the URL authority form).
    pub fn parse(raw: &str) -> Result<Self, NotifyError> {
        let url = Url::parse(raw)
            .map_err(|e| NotifyError::invalid_configuration(format!("malformed URL: {e}")))?;

        let scheme = url.scheme().to_string();
        let user = {
            let u = url.username();
            if u.is_empty() { None } else { Some(percent_decode(u)) }
        };
        let secret = url.password().map(percent_decode);
        let host = url
            .host_str()
            .map(|h| h.to_string())
            .unwrap_or_default();
        let port = url.port();

        let path_segments: Vec<String> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(percent_decode).collect())
            .unwrap_or_default();

        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            query.entry(k.into_owned()).or_default().push(v.into_owned());
        }

        Ok(ParsedUrl {
            scheme,
            user,
            secret,
            host,
            port,
            path_segments,
            query,
            raw: raw.to_string(),
        })
    }

    /// Fail fast when `scheme` does not match any of `expected`. The first
    /// transition in the shared state machine (`VALIDATE_SCHEME`).
    pub fn require_scheme(&self, expected: &[&str]) -> Result<(), NotifyError> {
        if expected.iter().any(|s| *s == self.scheme) {
            Ok(())
        } else {
            Err(NotifyError::invalid_configuration(format!(
                "scheme {:?} does not match provider scheme(s) {:?}",
                self.scheme, expected
            )))
        }
    }

    /// `user` as a single required secret, rejecting an absent or empty
    /// value (the `token@host` credential shape).
    pub fn require_user_as_token(&self) -> Result<String, NotifyError> {
        self.user
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotifyError::invalid_configuration("missing credential in URL userinfo"))
    }

    /// `(user, secret)` both required (the `id:secret@host` credential
    /// shape).
    pub fn require_user_and_secret(&self) -> Result<(String, String), NotifyError> {
        let user = self.require_user_as_token()?;
        let secret = self
            .secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotifyError::invalid_configuration("missing secret in URL userinfo"))?;
        Ok((user, secret))
    }

    /// Split the password position on `:` for schemes that chain more than
    /// one secret there (LinkedIn's `client_id:client_secret:access_token`).
    /// Returns `user` plus every colon-separated piece of `secret`.
    pub fn chained_secrets(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(u) = &self.user {
            parts.push(u.clone());
        }
        if let Some(s) = &self.secret {
            parts.extend(s.split(':').map(|p| p.to_string()));
        }
        parts
    }

    /// Required path segment at `index`, for routing fields like chat IDs
    /// or phone numbers.
    pub fn require_segment(&self, index: usize, field: &str) -> Result<&str, NotifyError> {
        self.path_segments
            .get(index)
            .map(|s| s.as_str())
            .ok_or_else(|| NotifyError::invalid_configuration(format!("missing required path segment: {field}")))
    }

    /// Optional first query value for `key`.
    pub fn query_get(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn query_get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.query_get(key).unwrap_or(default)
    }

    /// Parse an optional query value into `T`, failing with
    /// `InvalidConfiguration` when present but unparseable (the
    /// `VALIDATE_ENUMS` transition).
    pub fn query_parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, NotifyError> {
        match self.query_get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<T>()
                .map(Some)
                .map_err(|_| NotifyError::invalid_configuration(format!("invalid value for query field {key:?}: {v:?}"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

/// Walks the shared URL-parsing state machine on behalf of a provider,
/// recording which transition failed so error messages stay field-specific
/// instead of a single generic "bad URL".
pub struct UrlCursor<'a> {
    pub parsed: &'a ParsedUrl,
}

impl<'a> UrlCursor<'a> {
    pub fn new(parsed: &'a ParsedUrl) -> Self {
        UrlCursor { parsed }
    }

    /// `VALIDATE_SCHEME`.
    pub fn validate_scheme(self, expected: &[&str]) -> Result<Self, NotifyError> {
        self.parsed.require_scheme(expected)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_and_routing_segments() {
        let p = ParsedUrl::parse("discord://abc/xyz").unwrap();
        assert_eq!(p.scheme, "discord");
        assert_eq!(p.host, "abc");
        assert_eq!(p.path_segments, vec!["xyz"]);
    }

    #[test]
    fn parses_token_at_host_credential_shape() {
        let p = ParsedUrl::parse("pagerduty://integration_key@eu").unwrap();
        assert_eq!(p.user.as_deref(), Some("integration_key"));
        assert_eq!(p.host, "eu");
    }

    #[test]
    fn parses_id_secret_credential_shape() {
        let p = ParsedUrl::parse("mailto://u:p@smtp.x/r@y.z?subject=X").unwrap();
        assert_eq!(p.user.as_deref(), Some("u"));
        assert_eq!(p.secret.as_deref(), Some("p"));
        assert_eq!(p.host, "smtp.x");
        assert_eq!(p.path_segments, vec!["r@y.z"]);
        assert_eq!(p.query_get("subject"), Some("X"));
    }

    #[test]
    fn chained_secrets_splits_password_on_colon() {
        let p = ParsedUrl::parse("linkedin://cid:csecret:atoken@host").unwrap();
        assert_eq!(p.chained_secrets(), vec!["cid", "csecret", "atoken"]);
    }

    #[test]
    fn query_multimap_collects_repeated_keys() {
        let p = ParsedUrl::parse("ntfy://host/topic?tag=a&tag=b").unwrap();
        assert_eq!(p.query.get("tag").unwrap(), &vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn require_scheme_rejects_mismatch() {
        let p = ParsedUrl::parse("discord://abc/xyz").unwrap();
        let err = p.require_scheme(&["slack"]).unwrap_err();
        assert_eq!(err.kind, notifyhub_types::ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn malformed_url_is_invalid_configuration() {
        let err = ParsedUrl::parse("not a url").unwrap_err();
        assert_eq!(err.kind, notifyhub_types::ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn query_parse_rejects_unparseable_enum_value() {
        let p = ParsedUrl::parse("apns://wh/apns?key_id=K").unwrap();
        let err = p.query_parse::<u32>("key_id").unwrap_err();
        assert_eq!(err.kind, notifyhub_types::ErrorKind::InvalidConfiguration);
    }
}
