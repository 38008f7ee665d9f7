//! Timestamp formatting shared by every tier.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Returns the current UTC time as an RFC 3339 string with microsecond precision.
///
/// The fixed width keeps lexicographic order equal to chronological order, which
/// the stores rely on when sorting by `timestamp`.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an ISO-8601 timestamp. Values without an offset are read as UTC.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Re-renders an ISO-8601 timestamp in the same fixed-width UTC form as
/// [`now_timestamp`], so stored values compare correctly as strings.
#[must_use]
pub fn normalize_timestamp(value: &str) -> Option<String> {
    parse_timestamp(value.trim()).map(|parsed| parsed.to_rfc3339_opts(SecondsFormat::Micros, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_parses_back() {
        let stamp = now_timestamp();
        assert!(stamp.ends_with('Z'));
        assert!(parse_timestamp(&stamp).is_some());
    }

    #[test]
    fn accepts_naive_iso() {
        let parsed = parse_timestamp("2025-03-01T10:15:30.123456").expect("naive");
        assert_eq!(parsed.to_rfc3339(), "2025-03-01T10:15:30.123456+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn normalized_values_sort_chronologically() {
        let mut stamps: Vec<String> = [
            "2025-01-01T12:00:00+01:00",
            "2025-01-01T10:00:00.500000Z",
            "2025-01-01T10:00:00Z",
        ]
        .iter()
        .filter_map(|value| normalize_timestamp(value))
        .collect();
        stamps.sort();
        assert_eq!(
            stamps,
            [
                "2025-01-01T10:00:00.000000Z",
                "2025-01-01T10:00:00.500000Z",
                "2025-01-01T11:00:00.000000Z",
            ]
        );
        assert_eq!(normalize_timestamp("yesterday"), None);
    }
}
