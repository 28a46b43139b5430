//! Normalization of the date strings found in feed items.
//!
//! Feeds in the wild use a handful of layouts for `pubDate`. The accepted
//! layouts are tried in a fixed priority order and the first match wins:
//!
//! 1. RFC 1123 with a numeric zone: `Mon, 02 Jan 2006 15:04:05 -0700`
//! 2. RFC 1123 with a named zone: `Mon, 02 Jan 2006 15:04:05 MST`
//! 3. RFC 3339: `2006-01-02T15:04:05Z`
//!
//! The weekday prefix is checked for shape only. Plenty of feeds publish a
//! weekday that disagrees with the date, and the date is what matters.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// RFC 1123 layout after the optional `Mon, ` prefix has been removed
const RFC1123_NUMERIC_ZONE: &str = "%d %b %Y %H:%M:%S %z";
const RFC1123_LOCAL: &str = "%d %b %Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    /// None of the accepted layouts matched. Carries the raw input.
    #[error("unrecognized date format: {0:?}")]
    UnrecognizedDateFormat(String),
}

/// Parse a raw feed date into a UTC instant.
///
/// # Errors
///
/// [`DateError::UnrecognizedDateFormat`] when no accepted layout matches,
/// including for empty input.
pub fn normalize(raw: &str) -> Result<DateTime<Utc>, DateError> {
    let trimmed = raw.trim();

    parse_rfc1123_numeric(trimmed)
        .or_else(|| parse_rfc1123_named(trimmed))
        .or_else(|| parse_rfc3339(trimmed))
        .ok_or_else(|| DateError::UnrecognizedDateFormat(raw.to_string()))
}

fn parse_rfc1123_numeric(s: &str) -> Option<DateTime<Utc>> {
    let rest = strip_weekday(s)?;
    DateTime::parse_from_str(rest, RFC1123_NUMERIC_ZONE)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc1123_named(s: &str) -> Option<DateTime<Utc>> {
    let rest = strip_weekday(s)?;
    let (stamp, zone) = rest.rsplit_once(' ')?;
    if zone.is_empty() || zone.len() > 5 || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let offset_hours = match zone_offset_hours(zone) {
        Some(hours) => hours,
        None => {
            tracing::debug!(zone = %zone, "Unknown time zone abbreviation, assuming UTC");
            0
        }
    };

    let naive = NaiveDateTime::parse_from_str(stamp, RFC1123_LOCAL).ok()?;
    FixedOffset::east_opt(offset_hours * 3600)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drop a leading `Mon, ` if present. Returns `None` when the prefix is
/// malformed (`Monday 02 Jan ...` is not RFC 1123).
fn strip_weekday(s: &str) -> Option<&str> {
    match s.split_once(',') {
        Some((day, rest)) if day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            Some(rest.trim_start())
        }
        Some(_) => None,
        None => Some(s),
    }
}

/// RFC 2822 zone names (section 4.3)
fn zone_offset_hours(zone: &str) -> Option<i32> {
    match zone.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => Some(0),
        "EST" => Some(-5),
        "EDT" => Some(-4),
        "CST" => Some(-6),
        "CDT" => Some(-5),
        "MST" => Some(-7),
        "MDT" => Some(-6),
        "PST" => Some(-8),
        "PDT" => Some(-7),
        _ => None,
    }
}
