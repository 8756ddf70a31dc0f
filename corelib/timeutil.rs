//! Time parsing helpers, grounded on the teacher's `lib/timeutil.rs`.
//!
//! Unlike the teacher (which parses ISO-8601 durations as offsets from
//! `now`), this core needs durations as plain spans — for state TTLs
//! (spec.md §6) and the retry-delay ceiling (spec.md §4.3) — so
//! [`parse_iso8601_duration`] returns a [`std::time::Duration`] directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use iso8601_duration::Duration as IsoDuration;

pub fn parse_rfc3339(input: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(input).map(|t| t.with_timezone(&Utc))
}

pub fn to_rfc3339(input: &DateTime<Utc>) -> String {
    input.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parses an ISO-8601 duration string (e.g. `PT30S`, `P1D`) into a
/// [`Duration`]. Negative components are rejected: TTLs and delays are
/// always non-negative spans.
pub fn parse_iso8601_duration(input: &str) -> Option<Duration> {
    let d = IsoDuration::parse(input).ok()?;
    let seconds = d.year as f64 * 60. * 60. * 24. * 365.
        + d.month as f64 * 60. * 60. * 24. * 30.
        + d.day as f64 * 60. * 60. * 24.
        + d.hour as f64 * 60. * 60.
        + d.minute as f64 * 60.
        + d.second as f64;
    if seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0) as u64))
}

pub mod duration_as_iso8601 {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::parse_iso8601_duration;

    pub fn serialize<S>(input: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("PT{}S", input.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_iso8601_duration(&s).ok_or_else(|| {
            serde::de::Error::custom(
                "invalid ISO-8601 duration, expected e.g. `PT30S` or `P1D`",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_days() {
        assert_eq!(parse_iso8601_duration("PT30S"), Some(Duration::from_secs(30)));
        assert_eq!(
            parse_iso8601_duration("P1D"),
            Some(Duration::from_secs(86_400))
        );
    }

    #[test]
    fn rejects_negative_durations() {
        assert_eq!(parse_iso8601_duration("PT-5S"), None);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_iso8601_duration("not-a-duration"), None);
    }
}
