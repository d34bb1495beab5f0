//! Utility functions for the lecturer-beacon crate.

use chrono::{DateTime, Local, Locale, TimeZone};
use regex::Regex;
use std::env;
use std::fmt::Display;
use std::sync::LazyLock;
use tracing::debug;

// Each separator is matched on its own, so "00:11-22:33-44:55" passes too.
static MAC_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("MAC address pattern")
});

/// Check whether `mac` looks like a Bluetooth MAC address.
///
/// Six two-digit hex groups separated by `:` or `-`.
///
/// # Example
///
/// ```
/// use lecturer_beacon::validate_mac_address;
///
/// assert!(validate_mac_address("00:11:22:33:44:55"));
/// assert!(validate_mac_address("00-11-22-33-44-55"));
/// assert!(!validate_mac_address("00:11:22:33:44"));
/// ```
pub fn validate_mac_address(mac: &str) -> bool {
    let is_valid = MAC_ADDRESS_RE.is_match(mac);
    debug!(mac, is_valid, "MAC address validation");
    is_valid
}

/// Locale of the running process, from `LC_ALL`, `LC_TIME` or `LANG`.
///
/// Falls back to POSIX when none is set or the name is unknown.
pub fn runtime_locale() -> Locale {
    ["LC_ALL", "LC_TIME", "LANG"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.is_empty())
        .map(|value| parse_locale(&value))
        .unwrap_or(Locale::POSIX)
}

/// Parse a POSIX locale name such as `en_GB.UTF-8` or `de_DE@euro`.
pub fn parse_locale(name: &str) -> Locale {
    let base = name
        .split(['.', '@'])
        .next()
        .unwrap_or_default();
    match base {
        "" | "C" | "POSIX" => Locale::POSIX,
        other => Locale::try_from(other).unwrap_or(Locale::POSIX),
    }
}

/// Render `date` as a long-form local date and time in `locale`.
pub fn format_date_with_locale<Tz>(date: &DateTime<Tz>, locale: Locale) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    date.with_timezone(&Local)
        .format_localized("%c", locale)
        .to_string()
}

/// Render `date` as a long-form local date and time in the runtime locale.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use lecturer_beacon::format_date;
///
/// let date = Utc.with_ymd_and_hms(2024, 3, 20, 10, 0, 0).unwrap();
/// assert!(format_date(&date).contains("2024"));
/// ```
pub fn format_date<Tz>(date: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let formatted = format_date_with_locale(date, runtime_locale());
    debug!(output = %formatted, "Date formatting");
    formatted
}

/// Parse an RFC 3339 timestamp and format it with [`format_date`].
///
/// Returns `None` for input that is not a valid date.
pub fn format_date_str(input: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|date| format_date(&date))
}
