//! Bucket key construction and parsing
//!
//! A bucket key is `<identifier>_<yyyy>[_MM[_dd[_HH[_mm[_ss[_SSS]]]]]]`,
//! always rendered in UTC with zero-padded components. Keys of different
//! granularities for the same instant share prefixes, so a coarser key is a
//! plain truncation of a finer one.
//!
//! Identifiers must not contain `_`; the first delimiter separates the
//! identifier from the timestamp text.

use crate::error::{Result, TimelineError};
use crate::granularity::Granularity;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

/// Delimiter between identifier and timestamp components
pub const DELIMITER: char = '_';

/// Digit count of each timestamp component, coarse to fine
const COMPONENT_DIGITS: [usize; 7] = [4, 2, 2, 2, 2, 2, 3];

/// Build the bucket key of `timestamp_millis` at `granularity`
pub fn compute_bucket_key(
    identifier: &str,
    granularity: Granularity,
    timestamp_millis: i64,
) -> Result<String> {
    let full = full_timestamp_text(timestamp_millis)?;
    Ok(format!(
        "{}{}{}",
        identifier,
        DELIMITER,
        &full[..granularity.key_width()]
    ))
}

/// Split a bucket key into `(row, qualifier)` at its last delimiter
///
/// The row of a granularity is the complete key of the next coarser one;
/// YEAR rows are the bare identifier.
pub fn split_bucket_key(key: &str) -> Result<(&str, &str)> {
    key.rsplit_once(DELIMITER)
        .filter(|(row, qualifier)| !row.is_empty() && !qualifier.is_empty())
        .ok_or_else(|| TimelineError::parse(format!("bucket key without delimiter: {key}")))
}

/// Remove the leading `identifier_` segment
pub fn strip_identifier(key: &str) -> &str {
    match key.split_once(DELIMITER) {
        Some((_, rest)) => rest,
        None => key,
    }
}

/// Cut a fully qualified key down to a coarser granularity
pub fn truncate_key_to_granularity(key: &str, granularity: Granularity) -> Result<String> {
    let (identifier, text) = key
        .split_once(DELIMITER)
        .ok_or_else(|| TimelineError::parse(format!("bucket key without identifier: {key}")))?;
    let width = granularity.key_width();
    if text.len() < width || !text.is_char_boundary(width) {
        return Err(TimelineError::parse(format!(
            "key '{key}' is coarser than {granularity}"
        )));
    }
    Ok(format!("{}{}{}", identifier, DELIMITER, &text[..width]))
}

/// Parse bucket timestamp text back into epoch milliseconds (UTC)
///
/// Accepts either a full key or already stripped timestamp text. Text is
/// taken as stripped only when all of it is well-formed timestamp text, so
/// an all-digit identifier (`2024_2024_03`) is still stripped.
pub fn parse_bucket_timestamp(text: &str, granularity: Granularity) -> Result<i64> {
    let timestamp_text = if is_timestamp_text(text) {
        text
    } else {
        strip_identifier(text)
    };

    let width = granularity.key_width();
    if timestamp_text.len() < width || !timestamp_text.is_char_boundary(width) {
        return Err(TimelineError::parse(format!(
            "'{text}' does not match pattern {}",
            granularity.pattern()
        )));
    }

    let mut values = [0u32, 1, 1, 0, 0, 0, 0];
    let parts: Vec<&str> = timestamp_text[..width].split(DELIMITER).collect();
    if parts.len() != granularity.components() {
        return Err(TimelineError::parse(format!(
            "'{text}' does not match pattern {}",
            granularity.pattern()
        )));
    }
    for (idx, part) in parts.iter().enumerate() {
        if part.len() != COMPONENT_DIGITS[idx] || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimelineError::parse(format!(
                "invalid component '{part}' in '{text}'"
            )));
        }
        values[idx] = part
            .parse()
            .map_err(|e| TimelineError::parse(format!("invalid component '{part}': {e}")))?;
    }

    let [year, month, day, hour, minute, second, milli] = values;
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, milli))
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or_else(|| TimelineError::parse(format!("'{text}' is not a calendar date")))
}

/// Full `yyyy_MM_dd_HH_mm_ss_SSS` text of an instant
fn full_timestamp_text(timestamp_millis: i64) -> Result<String> {
    let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_millis).ok_or_else(|| {
        TimelineError::parse(format!("timestamp {timestamp_millis} out of range"))
    })?;
    if !(0..=9999).contains(&dt.year()) {
        return Err(TimelineError::parse(format!(
            "timestamp {timestamp_millis} outside four digit years"
        )));
    }
    Ok(format!(
        "{:04}_{:02}_{:02}_{:02}_{:02}_{:02}_{:03}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.timestamp_subsec_millis()
    ))
}

/// `yyyy[_MM[_dd[_HH[_mm[_ss[_SSS]]]]]]` with exact component widths
fn is_timestamp_text(text: &str) -> bool {
    let parts: Vec<&str> = text.split(DELIMITER).collect();
    parts.len() <= COMPONENT_DIGITS.len()
        && parts
            .iter()
            .zip(COMPONENT_DIGITS)
            .all(|(part, digits)| part.len() == digits && part.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // 2024-03-05T14:07:09.123Z
    const TS: i64 = 1_709_647_629_123;

    #[test]
    fn test_compute_bucket_key_all_granularities() {
        let expected = [
            "HPacket.7_2024",
            "HPacket.7_2024_03",
            "HPacket.7_2024_03_05",
            "HPacket.7_2024_03_05_14",
            "HPacket.7_2024_03_05_14_07",
            "HPacket.7_2024_03_05_14_07_09",
            "HPacket.7_2024_03_05_14_07_09_123",
        ];
        for (g, want) in Granularity::ALL.iter().zip(expected) {
            assert_eq!(compute_bucket_key("HPacket.7", *g, TS).unwrap(), want);
        }
    }

    #[test]
    fn test_compute_bucket_key_pads_millis() {
        let key = compute_bucket_key("Event", Granularity::Millisecond, 5).unwrap();
        assert_eq!(key, "Event_1970_01_01_00_00_00_005");
    }

    #[test]
    fn test_split_bucket_key() {
        let (row, qualifier) = split_bucket_key("Alarm.3_2024_03_05_14").unwrap();
        assert_eq!(row, "Alarm.3_2024_03_05");
        assert_eq!(qualifier, "14");

        let (row, qualifier) = split_bucket_key("Alarm.3_2024").unwrap();
        assert_eq!(row, "Alarm.3");
        assert_eq!(qualifier, "2024");

        assert!(split_bucket_key("nodelimiter").is_err());
    }

    #[test]
    fn test_strip_identifier() {
        assert_eq!(strip_identifier("Error_2024_03"), "2024_03");
        assert_eq!(strip_identifier("bare"), "bare");
    }

    #[test]
    fn test_truncate_rejects_finer_granularity() {
        let err = truncate_key_to_granularity("Event_2024_03", Granularity::Day).unwrap_err();
        assert!(matches!(err, TimelineError::ParseError(_)));
    }

    #[test]
    fn test_parse_accepts_stripped_and_full_text() {
        let stripped = parse_bucket_timestamp("2024_03_05", Granularity::Day).unwrap();
        let full = parse_bucket_timestamp("HPacket.7_2024_03_05_14", Granularity::Day).unwrap();
        assert_eq!(stripped, 1_709_596_800_000);
        assert_eq!(full, stripped);
    }

    #[test]
    fn test_parse_with_all_digit_identifier() {
        for g in [Granularity::Year, Granularity::Month, Granularity::Day] {
            let key = compute_bucket_key("2024", g, TS).unwrap();
            let expected = parse_bucket_timestamp(strip_identifier(&key), g).unwrap();
            assert_eq!(parse_bucket_timestamp(&key, g).unwrap(), expected);
        }
        let key = compute_bucket_key("1999", Granularity::Second, TS).unwrap();
        assert_eq!(
            parse_bucket_timestamp(&key, Granularity::Hour).unwrap(),
            parse_bucket_timestamp("2024_03_05_14", Granularity::Hour).unwrap()
        );
    }

    #[test]
    fn test_parse_millisecond() {
        let ms = parse_bucket_timestamp("2024_03_05_14_07_09_123", Granularity::Millisecond).unwrap();
        assert_eq!(ms, TS);
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        assert!(parse_bucket_timestamp("2024_3", Granularity::Month).is_err());
        assert!(parse_bucket_timestamp("2024_13", Granularity::Month).is_err());
        assert!(parse_bucket_timestamp("2024_02_30", Granularity::Day).is_err());
        assert!(parse_bucket_timestamp("abcd_ef", Granularity::Month).is_err());
    }
}
