use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

use crate::DomainResult;
use crate::error::DomainError;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

/// Parses a caller-supplied timestamp into UTC epoch milliseconds.
///
/// Offset-qualified RFC 3339 values are converted to UTC. Values without an
/// offset, and bare dates, are taken to already be UTC.
pub fn parse_timestamp_ms(value: &str) -> DomainResult<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation("timestamp is empty".into()));
    }

    let parsed = if let Ok(datetime) = OffsetDateTime::parse(value, &Rfc3339) {
        datetime
    } else if let Ok(datetime) = PrimitiveDateTime::parse(
        value,
        format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
        ),
    ) {
        datetime.assume_utc()
    } else if let Ok(date) = Date::parse(value, format_description!("[year]-[month]-[day]")) {
        date.midnight().assume_utc()
    } else {
        return Err(DomainError::Validation(format!(
            "invalid timestamp '{value}', expected RFC 3339"
        )));
    };

    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

pub fn dedupe_and_trim(values: &[String]) -> Vec<String> {
    let mut deduped = Vec::with_capacity(values.len());
    let mut seen = HashSet::new();
    for raw in values {
        let value = raw.trim().to_string();
        if value.is_empty() {
            continue;
        }
        if seen.insert(value.clone()) {
            deduped.push(value);
        }
    }
    deduped
}

pub(crate) fn require_text(field: &str, value: &str) -> DomainResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub(crate) fn require_length(field: &str, value: &str, min: usize, max: usize) -> DomainResult<String> {
    let value = require_text(field, value)?;
    let len = value.chars().count();
    if len < min || len > max {
        return Err(DomainError::Validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(value)
}

/// Document ids become path segments, so they may not contain `/`.
pub(crate) fn require_id(field: &str, value: &str) -> DomainResult<String> {
    let value = require_length(field, value, 1, 128)?;
    if value.contains('/') {
        return Err(DomainError::Validation(format!(
            "{field} must not contain '/'"
        )));
    }
    Ok(value)
}

/// Treats blank optional text as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_timestamps_are_normalized_to_utc() {
        let local = parse_timestamp_ms("2024-05-01T12:00:00+02:00").expect("parse");
        let utc = parse_timestamp_ms("2024-05-01T10:00:00Z").expect("parse");
        assert_eq!(local, utc);
    }

    #[test]
    fn naive_timestamps_are_taken_as_utc() {
        let naive = parse_timestamp_ms("2024-05-01T10:00:00").expect("parse");
        let utc = parse_timestamp_ms("2024-05-01T10:00:00Z").expect("parse");
        assert_eq!(naive, utc);

        let fractional = parse_timestamp_ms("2024-05-01T10:00:00.250").expect("parse");
        assert_eq!(fractional, utc + 250);
    }

    #[test]
    fn bare_dates_are_midnight_utc() {
        let date = parse_timestamp_ms("2024-05-01").expect("parse");
        let midnight = parse_timestamp_ms("2024-05-01T00:00:00Z").expect("parse");
        assert_eq!(date, midnight);
    }

    #[test]
    fn garbage_timestamps_are_rejected() {
        assert!(matches!(
            parse_timestamp_ms("yesterday"),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            parse_timestamp_ms("  "),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let input = vec![
            " u-2".to_string(),
            "u-1".to_string(),
            "".to_string(),
            "u-2".to_string(),
        ];
        assert_eq!(dedupe_and_trim(&input), vec!["u-2".to_string(), "u-1".to_string()]);
    }

    #[test]
    fn ids_reject_path_separators() {
        assert_eq!(require_id("user_id", " u-1 ").expect("valid"), "u-1");
        assert!(require_id("user_id", "a/b").is_err());
        assert!(require_id("user_id", &"x".repeat(129)).is_err());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_ms(10, 0, 100), 0);
        assert_eq!(backoff_ms(10, 1, 100), 10);
        assert_eq!(backoff_ms(10, 3, 100), 40);
        assert_eq!(backoff_ms(10, 8, 100), 100);
    }

    #[test]
    fn rfc3339_formatting_roundtrips_through_parse() {
        let formatted = format_ms_rfc3339(1_714_557_600_000);
        assert_eq!(parse_timestamp_ms(&formatted).expect("parse"), 1_714_557_600_000);
    }
}
