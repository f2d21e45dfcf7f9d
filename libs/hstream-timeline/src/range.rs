//! Timeline query ranges
//!
//! A query range is a sorted map of bucket start (epoch millis) to count,
//! pre-seeded with zeros so that empty buckets still show up in charts.

use crate::error::{Result, TimelineError};
use crate::granularity::Granularity;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Upper bound on the number of buckets a single range may hold
pub const MAX_RANGE_BUCKETS: usize = 1_000_000;

/// One point of a rendered timeline series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelinePoint {
    pub timestamp: i64,
    pub value: u64,
}

/// Parse a timezone into a fixed offset
///
/// Accepts `UTC`, `Z`, `GMT`, `±HH:MM`, `±HHMM`, `±HH` and the same offsets
/// prefixed with `UTC` or `GMT`.
pub fn parse_timezone(timezone: &str) -> Result<FixedOffset> {
    let tz = timezone.trim();
    let upper = tz.to_ascii_uppercase();
    if matches!(upper.as_str(), "UTC" | "Z" | "GMT") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid_timezone(timezone));
    }

    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let (sign, digits) = match offset.chars().next() {
        Some('+') => (1, &offset[1..]),
        Some('-') => (-1, &offset[1..]),
        _ => return Err(invalid_timezone(timezone)),
    };

    let compact: String = digits.chars().filter(|c| *c != ':').collect();
    if digits.matches(':').count() > 1
        || !compact.bytes().all(|b| b.is_ascii_digit())
        || !matches!(compact.len(), 2 | 4)
    {
        return Err(invalid_timezone(timezone));
    }

    let hours: i32 = compact[..2].parse().map_err(|_| invalid_timezone(timezone))?;
    let minutes: i32 = if compact.len() == 4 {
        compact[2..].parse().map_err(|_| invalid_timezone(timezone))?
    } else {
        0
    };
    if hours > 18 || minutes > 59 {
        return Err(invalid_timezone(timezone));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| invalid_timezone(timezone))
}

/// Pre-seed every bucket start in `[start, end)` with a zero count
///
/// Steps are calendar aware in `timezone`: YEAR adds one year, MONTH adds
/// the day count of the current month, finer granularities add one unit.
pub fn initialize_range(
    start_millis: i64,
    end_millis: i64,
    granularity: Granularity,
    timezone: &str,
) -> Result<BTreeMap<i64, u64>> {
    let offset = parse_timezone(timezone)?;
    let mut range = BTreeMap::new();
    if start_millis >= end_millis {
        return Ok(range);
    }

    let estimate = estimated_buckets(start_millis, end_millis, granularity);
    if estimate > MAX_RANGE_BUCKETS {
        return Err(TimelineError::RangeTooLarge {
            buckets: estimate,
            limit: MAX_RANGE_BUCKETS,
        });
    }

    let mut current = DateTime::from_timestamp_millis(start_millis)
        .ok_or_else(|| TimelineError::parse(format!("timestamp {start_millis} out of range")))?
        .with_timezone(&offset);

    while current.timestamp_millis() < end_millis {
        if range.len() >= MAX_RANGE_BUCKETS {
            return Err(TimelineError::RangeTooLarge {
                buckets: range.len() + 1,
                limit: MAX_RANGE_BUCKETS,
            });
        }
        range.insert(current.timestamp_millis(), 0);
        current = next_step(current, granularity)?;
    }

    Ok(range)
}

/// Add a scanned count to the bucket containing `timestamp`
///
/// Counts older than the first bucket are dropped. Returns whether the count
/// landed in the range.
pub fn merge_count(range: &mut BTreeMap<i64, u64>, timestamp: i64, count: u64) -> bool {
    match range.range_mut(..=timestamp).next_back() {
        Some((_, value)) => {
            *value = value.saturating_add(count);
            true
        },
        None => false,
    }
}

/// Render a range as `[{"timestamp": .., "value": ..}, ..]`
pub fn to_json_series(range: &BTreeMap<i64, u64>) -> serde_json::Value {
    serde_json::Value::Array(
        range
            .iter()
            .map(|(timestamp, value)| {
                serde_json::json!({
                    "timestamp": timestamp,
                    "value": value,
                })
            })
            .collect(),
    )
}

/// Collect a range into points, oldest first
pub fn to_points(range: &BTreeMap<i64, u64>) -> Vec<TimelinePoint> {
    range
        .iter()
        .map(|(timestamp, value)| TimelinePoint {
            timestamp: *timestamp,
            value: *value,
        })
        .collect()
}

fn next_step(current: DateTime<FixedOffset>, granularity: Granularity) -> Result<DateTime<FixedOffset>> {
    let next = match granularity {
        Granularity::Year => current.checked_add_months(Months::new(12)),
        Granularity::Month => {
            let days = days_in_month(current.year(), current.month())?;
            current.checked_add_signed(Duration::days(days))
        },
        Granularity::Day => current.checked_add_signed(Duration::days(1)),
        Granularity::Hour => current.checked_add_signed(Duration::hours(1)),
        Granularity::Minute => current.checked_add_signed(Duration::minutes(1)),
        Granularity::Second => current.checked_add_signed(Duration::seconds(1)),
        Granularity::Millisecond => current.checked_add_signed(Duration::milliseconds(1)),
    };
    next.ok_or_else(|| TimelineError::parse(format!("range step overflow after {current}")))
}

fn days_in_month(year: i32, month: u32) -> Result<i64> {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next_first) {
        (Some(a), Some(b)) => Ok((b - a).num_days()),
        _ => Err(TimelineError::parse(format!("invalid month {year}-{month}"))),
    }
}

/// Lower bound of the bucket count, exact for fixed-length steps
fn estimated_buckets(start_millis: i64, end_millis: i64, granularity: Granularity) -> usize {
    const DAY_MS: i64 = 86_400_000;
    let unit = match granularity {
        Granularity::Year => 366 * DAY_MS,
        Granularity::Month => 31 * DAY_MS,
        Granularity::Day => DAY_MS,
        Granularity::Hour => 3_600_000,
        Granularity::Minute => 60_000,
        Granularity::Second => 1_000,
        Granularity::Millisecond => 1,
    };
    let span = end_millis.saturating_sub(start_millis).max(0);
    let buckets = span / unit + i64::from(span % unit != 0);
    usize::try_from(buckets).unwrap_or(usize::MAX)
}

fn invalid_timezone(timezone: &str) -> TimelineError {
    TimelineError::parse(format!("invalid timezone: {timezone}"))
}
