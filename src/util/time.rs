//! Timestamp resolution for feed dates of unknown shape.
//!
//! Feeds and legacy archive files carry dates as RFC 2822 strings, RFC 3339
//! strings, bare epoch numbers, epoch strings and a handful of ad-hoc
//! layouts. [`resolve_timestamp`] folds all of them into a single UTC instant
//! and never fails: anything it cannot make sense of resolves to `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Epoch values above this magnitude are milliseconds, below it seconds.
const MILLIS_THRESHOLD: f64 = 10_000_000_000.0;

/// Layouts carrying an explicit offset, tried after RFC 3339 / RFC 2822.
const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y/%m/%d %H:%M:%S %z",
];

/// Layouts without an offset; the result is taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%SZ",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%b %d, %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Bare zone abbreviations treated as a zero offset.
const UTC_ABBREVIATIONS: &[&str] = &["UTC", "GMT", "UT"];

/// A date value as found in a feed or an archive file.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// Already resolved by a structured parser.
    Instant(DateTime<Utc>),
    /// Epoch seconds or milliseconds.
    Number(f64),
    /// Free-form text.
    Text(String),
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        RawTimestamp::Instant(dt)
    }
}

impl From<&str> for RawTimestamp {
    fn from(s: &str) -> Self {
        RawTimestamp::Text(s.to_string())
    }
}

/// Resolves a date of unknown shape into a UTC instant.
///
/// Rules, in order:
/// - numbers are epoch values, milliseconds when `|n| > 10_000_000_000`
/// - text is trimmed and a literal `$D` prefix removed
/// - 12+ digits are epoch milliseconds, 9–11 digits epoch seconds; shorter
///   digit runs go on to the layouts (`20240102` is a date)
/// - otherwise a permissive parse (RFC 3339, RFC 2822, common layouts) where
///   bare `UT`/`UTC`/`GMT` mean `+0000` and a missing zone means UTC
///
/// # Examples
///
/// ```
/// use feedroll::util::{resolve_timestamp, RawTimestamp};
///
/// let ts = resolve_timestamp(Some(&RawTimestamp::from("1700000000"))).unwrap();
/// assert_eq!(ts.timestamp(), 1_700_000_000);
///
/// assert!(resolve_timestamp(Some(&RawTimestamp::from("yesterday-ish"))).is_none());
/// assert!(resolve_timestamp(None).is_none());
/// ```
pub fn resolve_timestamp(value: Option<&RawTimestamp>) -> Option<DateTime<Utc>> {
    match value? {
        RawTimestamp::Instant(dt) => Some(*dt),
        RawTimestamp::Number(n) => from_epoch_number(*n),
        RawTimestamp::Text(s) => resolve_text(s),
    }
}

/// Convenience for string-typed dates (feed elements, stored archive fields).
pub fn resolve_str(value: &str) -> Option<DateTime<Utc>> {
    resolve_text(value)
}

/// Formats an instant the way every output file stores it:
/// RFC 3339, UTC, microsecond precision, `Z` suffix.
pub fn to_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_epoch_number(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() {
        return None;
    }
    if n.abs() > MILLIS_THRESHOLD {
        let millis = n.round();
        if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
            return None;
        }
        return DateTime::from_timestamp_millis(millis as i64);
    }
    from_epoch_seconds(n)
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = ((secs - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn resolve_text(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    let s = s.strip_prefix("$D").unwrap_or(s).trim();
    if s.is_empty() {
        return None;
    }

    // Shorter digit runs ("20240102") fall through to the layouts.
    if s.bytes().all(|b| b.is_ascii_digit()) {
        match s.len() {
            len if len >= 12 => {
                return s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
            }
            9..=11 => {
                return s
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
            }
            _ => {}
        }
    }

    parse_free_form(s)
}

fn parse_free_form(s: &str) -> Option<DateTime<Utc>> {
    let s = expand_utc_abbreviation(s);
    let s = s.as_str();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Feeds regularly carry a weekday that disagrees with the date; chrono
    // rejects those, so retry without it.
    let candidates = [s, strip_weekday(s)];
    for candidate in candidates {
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(naive.and_utc());
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, fmt) {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
        }
    }

    None
}

/// `"... 12:00:00 GMT"` → `"... 12:00:00 +0000"`.
fn expand_utc_abbreviation(s: &str) -> String {
    for abbr in UTC_ABBREVIATIONS {
        if let Some(head) = s.strip_suffix(abbr) {
            if head.ends_with(' ') {
                return format!("{}+0000", head);
            }
        }
    }
    s.to_string()
}

fn strip_weekday(s: &str) -> &str {
    match s.split_once(", ") {
        Some((day, rest)) if day.len() <= 9 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest
        }
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text(s: &str) -> Option<DateTime<Utc>> {
        resolve_timestamp(Some(&RawTimestamp::from(s)))
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_absent_is_none() {
        assert_eq!(resolve_timestamp(None), None);
    }

    #[test]
    fn test_instant_passes_through() {
        let dt = at(2024, 5, 1, 8, 0, 0);
        assert_eq!(resolve_timestamp(Some(&RawTimestamp::Instant(dt))), Some(dt));
    }

    #[test]
    fn test_numeric_seconds_and_millis() {
        let secs = RawTimestamp::Number(1_700_000_000.0);
        assert_eq!(
            resolve_timestamp(Some(&secs)).map(|d| d.timestamp()),
            Some(1_700_000_000)
        );

        let millis = RawTimestamp::Number(1_700_000_000_123.0);
        let dt = resolve_timestamp(Some(&millis)).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let at_threshold = RawTimestamp::Number(10_000_000_000.0);
        assert_eq!(
            resolve_timestamp(Some(&at_threshold)).map(|d| d.timestamp()),
            Some(10_000_000_000)
        );
    }

    #[test]
    fn test_digit_strings() {
        assert_eq!(text("1700000000123").map(|d| d.timestamp_millis()), Some(1_700_000_000_123));
        assert_eq!(text("1700000000").map(|d| d.timestamp()), Some(1_700_000_000));
        assert_eq!(text("99999999999").map(|d| d.timestamp()), Some(99_999_999_999));
        assert_eq!(text("123456789").map(|d| d.timestamp()), Some(123_456_789));
        assert_eq!(text("12345678"), None);
    }

    #[test]
    fn test_compact_date_digits() {
        assert_eq!(text("20240102"), Some(at(2024, 1, 2, 0, 0, 0)));
        assert_eq!(text(" 20231231 "), Some(at(2023, 12, 31, 0, 0, 0)));
        assert_eq!(text("2024"), None);
        assert_eq!(text("20241340"), None);
    }

    #[test]
    fn test_dollar_d_prefix() {
        assert_eq!(text("$D1700000000").map(|d| d.timestamp()), Some(1_700_000_000));
        assert_eq!(
            text("$D2024-03-01T10:00:00.000Z"),
            Some(at(2024, 3, 1, 10, 0, 0))
        );
    }

    #[test]
    fn test_rfc2822_with_bare_zones() {
        let expected = at(2024, 1, 2, 3, 4, 5);
        assert_eq!(text("Tue, 02 Jan 2024 03:04:05 GMT"), Some(expected));
        assert_eq!(text("Tue, 02 Jan 2024 03:04:05 UT"), Some(expected));
        assert_eq!(text("Tue, 02 Jan 2024 03:04:05 UTC"), Some(expected));
        assert_eq!(text("Tue, 02 Jan 2024 11:04:05 +0800"), Some(expected));
    }

    #[test]
    fn test_wrong_weekday_still_parses() {
        assert_eq!(
            text("Mon, 02 Jan 2024 03:04:05 +0000"),
            Some(at(2024, 1, 2, 3, 4, 5))
        );
    }

    #[test]
    fn test_rfc3339_with_offset() {
        assert_eq!(
            text("2024-01-02T11:04:05+08:00"),
            Some(at(2024, 1, 2, 3, 4, 5))
        );
    }

    #[test]
    fn test_naive_assumed_utc() {
        assert_eq!(text("2024-01-02 03:04:05"), Some(at(2024, 1, 2, 3, 4, 5)));
        assert_eq!(text("2024-01-02T03:04:05"), Some(at(2024, 1, 2, 3, 4, 5)));
        assert_eq!(text("2024-01-02"), Some(at(2024, 1, 2, 0, 0, 0)));
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(text(""), None);
        assert_eq!(text("   "), None);
        assert_eq!(text("not a date"), None);
        assert_eq!(resolve_timestamp(Some(&RawTimestamp::Number(f64::NAN))), None);
    }

    #[test]
    fn test_to_iso_format() {
        assert_eq!(to_iso(&at(2024, 1, 2, 3, 4, 5)), "2024-01-02T03:04:05.000000Z");
    }
}
