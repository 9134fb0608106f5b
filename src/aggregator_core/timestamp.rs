//! Receipt-time formatting and time-instant parsing for last-data comparisons

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};

const HUMAN_READABLE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Render epoch millis as `YYYY-MM-DDTHH:MM:SS.mmm`, suffixed with `Z` in UTC mode
pub fn human_readable(millis: i64, utc: bool) -> String {
    let Some(instant) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        log::warn!("Receipt time {} out of range, keeping raw millis", millis);
        return millis.to_string();
    };

    if utc {
        format!("{}Z", instant.format(HUMAN_READABLE_FORMAT))
    } else {
        instant
            .with_timezone(&Local)
            .format(HUMAN_READABLE_FORMAT)
            .to_string()
    }
}

/// Parse a stored or notified time instant into epoch millis
///
/// Accepts integer millis, RFC 3339 / ISO-8601 (with or without offset, naive
/// values are read as UTC), SQL-style `YYYY-MM-DD HH:MM:SS[.fff]` and bare dates.
pub fn parse_time_instant(raw: &str) -> Option<i64> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(millis) = text.parse::<i64>() {
        return Some(millis);
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.timestamp_millis());
    }

    if let Ok(instant) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(instant.timestamp_millis());
    }

    let naive = text.strip_suffix('Z').unwrap_or(text);
    for format in NAIVE_FORMATS {
        if let Ok(instant) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(instant.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_utc() {
        assert_eq!(human_readable(0, true), "1970-01-01T00:00:00.000Z");
        assert_eq!(human_readable(1_700_000_000_123, true), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_human_readable_local() {
        let millis = 1_700_000_000_123;
        let text = human_readable(millis, false);

        assert!(!text.ends_with('Z'));
        assert!(NaiveDateTime::parse_from_str(&text, HUMAN_READABLE_FORMAT).is_ok());
        let expected = DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap()
            .with_timezone(&Local)
            .format(HUMAN_READABLE_FORMAT)
            .to_string();
        assert_eq!(text, expected);
        assert!(text.ends_with(".123"));
    }

    #[test]
    fn test_human_readable_round_trips_through_parser() {
        let text = human_readable(1_700_000_000_123, true);
        assert_eq!(parse_time_instant(&text), Some(1_700_000_000_123));
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_time_instant("150"), Some(150));
        assert_eq!(parse_time_instant("2023-11-14T22:13:20Z"), Some(1_700_000_000_000));
        assert_eq!(parse_time_instant("2023-11-14T23:13:20+01:00"), Some(1_700_000_000_000));
        assert_eq!(parse_time_instant("2023-11-14T22:13:20.500+0000"), Some(1_700_000_000_500));
        assert_eq!(parse_time_instant("2023-11-14 22:13:20.250"), Some(1_700_000_000_250));
        assert_eq!(parse_time_instant("2023-11-14T22:13:20"), Some(1_700_000_000_000));
        assert_eq!(parse_time_instant("2023-11-14"), Some(1_699_920_000_000));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_time_instant(""), None);
        assert_eq!(parse_time_instant("yesterday"), None);
        assert_eq!(parse_time_instant("2023-13-45T99:00:00Z"), None);
    }
}
