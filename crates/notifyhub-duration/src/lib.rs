//! Duration parsing and serde codecs shared across notifyhub crates.
//!
//! Every duration-bearing field in the engine (retry backoffs, scheduler
//! intervals, deadlines) accepts either a human-readable string (`"30s"`,
//! `"2m"`) or a raw millisecond count on the wire, and always serializes back
//! out as milliseconds so persisted state round-trips losslessly.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a [`Duration`] from either a humantime string or a u64 of
/// milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a [`Duration`] as milliseconds, the canonical on-disk form.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Parse a humantime duration string, rejecting anything serde's untagged
/// helper would otherwise accept silently (e.g. negative or empty input).
pub fn parse_duration_str(input: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(input)
}

/// Wrapper for use with `#[serde(with = "notifyhub_duration::duration_field")]`.
pub mod duration_field {
    pub use super::{deserialize_duration as deserialize, serialize_duration as serialize};
}

/// Same as [`duration_field`] but for `Option<Duration>` fields.
pub mod optional_duration_field {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<super::DurationHelperPublic> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(super::DurationHelperPublic::String(s)) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
            Some(super::DurationHelperPublic::U64(ms)) => Ok(Some(Duration::from_millis(ms))),
        }
    }

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationHelperPublic {
    String(String),
    U64(u64),
}
