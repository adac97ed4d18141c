//! On-disk format of the lock configuration.
//!
//! Durations may be written as a bare integer (milliseconds) or as a string
//! with a unit suffix.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// prefix prepended to every lock path
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_locks_root")]
    pub locks_root: String,
    #[serde(
        default = "default_session_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub session_timeout: Duration,
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub connect_timeout: Duration,
    /// wait used when no explicit timeout is given, defaults to `session_timeout`
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_wait: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            locks_root: default_locks_root(),
            session_timeout: default_session_timeout(),
            connect_timeout: default_connect_timeout(),
            default_wait: None,
        }
    }
}

pub fn default_locks_root() -> String {
    "/locks".to_owned()
}

pub const fn default_session_timeout() -> Duration {
    Duration::from_secs(30)
}

pub const fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Parse a duration string with optional time units
/// Accepts: "1500", "1500ms", "30s", "5m", "1h"
/// If no unit is specified, assumes milliseconds
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration string");
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let millis_per_unit = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => bail!(
            "unknown time unit '{}', only 'h', 'm', 's' or 'ms' are supported",
            other
        ),
    };

    num.checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Millis(u64),
    String(String),
}

impl WireDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            WireDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom),
        }
    }
}

fn deserialize_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    WireDuration::deserialize(de)?.into_duration()
}

fn deserialize_optional_duration<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireDuration>::deserialize(de)?
        .map(WireDuration::into_duration)
        .transpose()
}

fn serialize_duration<S>(d: &Duration, ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    ser.serialize_str(&format!("{}ms", d.as_millis()))
}

fn serialize_optional_duration<S>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match d {
        Some(d) => serialize_duration(d, ser),
        None => ser.serialize_none(),
    }
}
