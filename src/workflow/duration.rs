//! Duration Strings
//!
//! Workflow documents express timeouts the way Go tooling does
//! (`"30m"`, `"1h30m"`, `"2.5s"`, `"250ms"`). This module parses and
//! renders that format so existing workflow documents load unchanged.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;
const NANOS_PER_MINUTE: f64 = 60.0 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: f64 = 60.0 * NANOS_PER_MINUTE;

/// Error returned when a duration string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,

    #[error("negative duration '{0}' is not allowed")]
    Negative(String),

    #[error("invalid duration '{0}'")]
    Invalid(String),

    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),

    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
}

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parses a Go-style duration string such as `"1h15m30.5s"`.
///
/// A bare `"0"` is accepted; every other component needs a unit.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use magex::workflow::duration::parse_duration;
///
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert!(parse_duration("90").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let body = match trimmed.as_bytes()[0] {
        b'-' => {
            let rest = &trimmed[1..];
            if rest.chars().all(|c| c == '0') && !rest.is_empty() {
                return Ok(Duration::ZERO);
            }
            return Err(DurationParseError::Negative(input.to_string()));
        }
        b'+' => &trimmed[1..],
        _ => trimmed,
    };

    if body == "0" {
        return Ok(Duration::ZERO);
    }
    if body.is_empty() {
        return Err(DurationParseError::Invalid(input.to_string()));
    }

    let mut total_nanos = 0.0_f64;
    let mut rest = body;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(DurationParseError::Invalid(input.to_string()));
        }

        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(DurationParseError::MissingUnit(input.to_string()));
        }
        rest = &rest[unit_len..];

        let scale = unit_nanos(unit).ok_or_else(|| DurationParseError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;
        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::Invalid(input.to_string()))?;

        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationParseError::Invalid(input.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parses an optional duration field, treating blank strings as unset.
pub fn parse_optional(input: &str) -> Result<Option<Duration>, DurationParseError> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    parse_duration(input).map(Some)
}

/// Renders a duration in the same compact format it is parsed from.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", trim_fraction(nanos as f64 / NANOS_PER_MICRO));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_fraction(nanos as f64 / NANOS_PER_MILLI));
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as f64 + f64::from(duration.subsec_nanos()) / NANOS_PER_SECOND;
    let seconds = trim_fraction(seconds);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Rounds to the nearest whole second, for tabular display.
pub fn round_to_secs(duration: Duration) -> Duration {
    let secs = duration.as_secs();
    if duration.subsec_millis() >= 500 {
        Duration::from_secs(secs + 1)
    } else {
        Duration::from_secs(secs)
    }
}

fn trim_fraction(value: f64) -> String {
    let text = format!("{:.9}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Serializes a `Duration` as integer nanoseconds.
///
/// Execution documents have always carried step durations this way.
pub mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}
