//! Expiry strings.
//!
//! A sandbox can carry an advisory expiry, given as an amount and a unit
//! (`30m`, `2h`, `7d`, `3M`, `1y`) or as bare digits meaning days. It is
//! stored as an absolute host-local timestamp. Nothing enforces it.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;

/// Stored timestamp layout.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Parse a relative duration such as `45s`, `30m`, `2h`, `7d`, `3M` or `1y`.
///
/// `M` is 30 days and `y` is 365 days. Bare digits are days.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || CoreError::InvalidExpiry(input.to_string());
    let trimmed = input.trim();

    let (digits, unit) = match trimmed.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&trimmed[..idx], c),
        Some(_) => (trimmed, 'd'),
        None => return Err(invalid()),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let unit_secs = match unit {
        's' => 1,
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        'M' => 30 * DAY,
        'y' => 365 * DAY,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Absolute expiry for `input` measured from `now`.
pub fn expiry_from<Tz: TimeZone>(input: &str, now: DateTime<Tz>) -> Result<DateTime<Tz>> {
    let duration = parse_duration(input)?;
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| CoreError::InvalidExpiry(input.to_string()))
}

/// Absolute expiry for `input` from the current local time, in stored form.
pub fn format_expiry(input: &str) -> Result<String> {
    let at = expiry_from(input, Local::now())?;
    Ok(at.format(EXPIRY_FORMAT).to_string())
}
