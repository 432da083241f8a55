//! Lenient date parsing for feed items.
//!
//! Feed payloads carry dates in whatever shape the publisher used: ISO-8601
//! dates and datetimes, RFC-2822 `pubDate` strings, slash-separated dates,
//! or Unix timestamps. Everything is normalized to UTC. Parsing never fails
//! loudly: an unparseable value is simply "no date".

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Item fields that may carry the publication date, in lookup order.
pub const DATE_FIELDS: &[&str] = &[
    "date",
    "published",
    "published_at",
    "publishedAt",
    "updated",
    "updated_at",
    "updatedAt",
];

/// Timestamps with a larger magnitude are treated as milliseconds.
const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// Digit-only strings shorter than this are never read as timestamps.
const MIN_TIMESTAMP_DIGITS: usize = 9;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const LOOSE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Parse a JSON value into a UTC calendar date.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    parse_datetime(value).map(|dt| dt.date())
}

/// Parse a JSON value into a naive UTC datetime.
///
/// Strings and numbers are accepted; every other JSON type yields `None`.
pub fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_timestamp),
        Value::String(s) => parse_datetime_str(s),
        _ => None,
    }
}

/// Parse a date string. See the module docs for accepted shapes.
pub fn parse_datetime_str(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(dt) = parse_iso(text) {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.naive_utc());
    }

    if looks_like_timestamp(text) {
        return text.parse::<f64>().ok().and_then(from_timestamp);
    }

    for fmt in LOOSE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    embedded_ymd(text).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Return the first parseable date among an item's [`DATE_FIELDS`].
pub fn item_date(item: &Value) -> Option<NaiveDate> {
    item_datetime(item).map(|dt| dt.date())
}

/// Return the first parseable datetime among an item's [`DATE_FIELDS`].
pub fn item_datetime(item: &Value) -> Option<NaiveDateTime> {
    let obj = item.as_object()?;
    DATE_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(parse_datetime)
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let candidate = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(rest) => format!("{}+00:00", rest),
        None => text.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(dt.naive_utc());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
            return Some(dt);
        }
    }
    None
}

fn from_timestamp(raw: f64) -> Option<NaiveDateTime> {
    if !raw.is_finite() {
        return None;
    }
    let secs = if raw.abs() > MILLIS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    };
    if secs.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(secs.trunc() as i64, 0).map(|dt| dt.naive_utc())
}

fn looks_like_timestamp(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    whole.len() >= MIN_TIMESTAMP_DIGITS
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

/// Find the first `YYYY[-/]M[M][-/]D[D]` run anywhere in `text`.
fn embedded_ymd(text: &str) -> Option<NaiveDate> {
    let bytes = text.as_bytes();
    (0..bytes.len()).find_map(|start| {
        let (year, month, day) = ymd_at(&bytes[start..])?;
        Some(NaiveDate::from_ymd_opt(year as i32, month, day))
    })?
}

fn ymd_at(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    let (year, rest) = take_digits(bytes, 4, 4)?;
    let rest = take_separator(rest)?;
    let (month, rest) = take_digits(rest, 1, 2)?;
    let rest = take_separator(rest)?;
    let (day, _) = take_digits(rest, 1, 2)?;
    Some((year, month, day))
}

fn take_separator(bytes: &[u8]) -> Option<&[u8]> {
    match bytes.split_first() {
        Some((b'-' | b'/', rest)) => Some(rest),
        _ => None,
    }
}

fn take_digits(bytes: &[u8], min: usize, max: usize) -> Option<(u32, &[u8])> {
    let len = bytes
        .iter()
        .take(max)
        .take_while(|b| b.is_ascii_digit())
        .count();
    if len < min {
        return None;
    }
    let value = bytes[..len]
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    Some((value, &bytes[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_iso_date() {
        assert_eq!(parse_date(&json!("2024-05-08")), Some(ymd(2024, 5, 8)));
    }

    #[test]
    fn test_iso_datetime_with_zulu() {
        let dt = parse_datetime(&json!("2024-05-10T08:00:00Z")).unwrap();
        assert_eq!(dt.to_string(), "2024-05-10 08:00:00");
    }

    #[test]
    fn test_offset_converted_to_utc() {
        // 01:30 at +03:00 is the previous day in UTC.
        assert_eq!(
            parse_date(&json!("2024-05-10T01:30:00+03:00")),
            Some(ymd(2024, 5, 9))
        );
    }

    #[test]
    fn test_naive_datetime_with_space() {
        assert_eq!(
            parse_date(&json!("2024-05-10 12:30:00")),
            Some(ymd(2024, 5, 10))
        );
    }

    #[test]
    fn test_rfc2822_pubdate() {
        assert_eq!(
            parse_date(&json!("Wed, 08 May 2024 23:15:00 -0200")),
            Some(ymd(2024, 5, 9))
        );
    }

    #[test]
    fn test_slash_date() {
        assert_eq!(parse_date(&json!("2024/05/01")), Some(ymd(2024, 5, 1)));
    }

    #[test]
    fn test_human_dates() {
        assert_eq!(parse_date(&json!("8 May 2024")), Some(ymd(2024, 5, 8)));
        assert_eq!(parse_date(&json!("May 8, 2024")), Some(ymd(2024, 5, 8)));
    }

    #[test]
    fn test_embedded_date() {
        assert_eq!(
            parse_date(&json!("posted 2024-5-1 by staff")),
            Some(ymd(2024, 5, 1))
        );
    }

    #[test]
    fn test_timestamps_seconds_and_millis() {
        assert_eq!(parse_date(&json!(1715126400)), Some(ymd(2024, 5, 8)));
        assert_eq!(parse_date(&json!(1715126400000i64)), Some(ymd(2024, 5, 8)));
        assert_eq!(parse_date(&json!(1715126400.5)), Some(ymd(2024, 5, 8)));
        assert_eq!(parse_date(&json!("1715126400")), Some(ymd(2024, 5, 8)));
    }

    #[test]
    fn test_short_digit_string_is_not_timestamp() {
        assert_eq!(parse_date(&json!("2024")), None);
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_date(&json!("yesterday-ish")), None);
        assert_eq!(parse_date(&json!("")), None);
        assert_eq!(parse_date(&json!("   ")), None);
        assert_eq!(parse_date(&json!("2024-13-45")), None);
        assert_eq!(parse_date(&json!(true)), None);
        assert_eq!(parse_date(&json!(null)), None);
        assert_eq!(parse_date(&json!({"date": "2024-05-01"})), None);
    }

    #[test]
    fn test_item_date_uses_first_parseable_field() {
        let item = json!({"date": "not a date", "published_at": "2024-04-30"});
        assert_eq!(item_date(&item), Some(ymd(2024, 4, 30)));
    }

    #[test]
    fn test_item_date_missing() {
        assert_eq!(item_date(&json!({"slug": "x"})), None);
        assert_eq!(item_date(&json!("2024-05-01")), None);
    }
}
