//! Timeline granularities
//!
//! Seven truncation levels, ordered coarse to fine. Each level knows the
//! width of its timestamp text inside a bucket key and the column family its
//! counters live in.

use crate::error::{Result, TimelineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket granularity (timestamp truncation level)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl Granularity {
    /// All granularities, coarse to fine
    pub const ALL: [Granularity; 7] = [
        Granularity::Year,
        Granularity::Month,
        Granularity::Day,
        Granularity::Hour,
        Granularity::Minute,
        Granularity::Second,
        Granularity::Millisecond,
    ];

    /// Canonical name, also used as the timeline column family
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
            Self::Hour => "HOUR",
            Self::Minute => "MINUTE",
            Self::Second => "SECOND",
            Self::Millisecond => "MILLISECOND",
        }
    }

    /// Column family holding this granularity's counters
    pub const fn column_family(&self) -> &'static str {
        self.as_str()
    }

    /// Number of `_`-separated timestamp components (`yyyy` = 1 … `SSS` = 7)
    pub const fn components(&self) -> usize {
        match self {
            Self::Year => 1,
            Self::Month => 2,
            Self::Day => 3,
            Self::Hour => 4,
            Self::Minute => 5,
            Self::Second => 6,
            Self::Millisecond => 7,
        }
    }

    /// Width of the timestamp text (`2024_03_05_14_07_09_123` is 23)
    pub const fn key_width(&self) -> usize {
        match self {
            Self::Year => 4,
            Self::Month => 7,
            Self::Day => 10,
            Self::Hour => 13,
            Self::Minute => 16,
            Self::Second => 19,
            Self::Millisecond => 23,
        }
    }

    /// Human readable pattern of the timestamp text
    pub const fn pattern(&self) -> &'static str {
        match self {
            Self::Year => "yyyy",
            Self::Month => "yyyy_MM",
            Self::Day => "yyyy_MM_dd",
            Self::Hour => "yyyy_MM_dd_HH",
            Self::Minute => "yyyy_MM_dd_HH_mm",
            Self::Second => "yyyy_MM_dd_HH_mm_ss",
            Self::Millisecond => "yyyy_MM_dd_HH_mm_ss_SSS",
        }
    }

    /// The next coarser granularity, `None` for YEAR
    pub const fn coarser(&self) -> Option<Granularity> {
        match self {
            Self::Year => None,
            Self::Month => Some(Self::Year),
            Self::Day => Some(Self::Month),
            Self::Hour => Some(Self::Day),
            Self::Minute => Some(Self::Hour),
            Self::Second => Some(Self::Minute),
            Self::Millisecond => Some(Self::Second),
        }
    }

    /// Returns `self` if it is at least as fine as `floor`, otherwise `floor`
    pub fn at_least(self, floor: Granularity) -> Granularity {
        self.max(floor)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Granularity::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == upper)
            .ok_or_else(|| TimelineError::UnsupportedGranularity(s.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("Millisecond".parse::<Granularity>().unwrap(), Granularity::Millisecond);
        assert_eq!(" YEAR ".parse::<Granularity>().unwrap(), Granularity::Year);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "WEEK".parse::<Granularity>().unwrap_err();
        assert_eq!(err, TimelineError::UnsupportedGranularity("WEEK".to_string()));
    }

    #[test]
    fn test_widths_match_patterns() {
        for g in Granularity::ALL {
            assert_eq!(g.key_width(), g.pattern().len(), "{}", g);
            assert_eq!(g.pattern().split('_').count(), g.components());
        }
    }

    #[test]
    fn test_ordering_and_floor() {
        assert!(Granularity::Year < Granularity::Millisecond);
        assert_eq!(Granularity::Day.at_least(Granularity::Hour), Granularity::Hour);
        assert_eq!(Granularity::Second.at_least(Granularity::Hour), Granularity::Second);
        assert_eq!(Granularity::Month.coarser(), Some(Granularity::Year));
        assert_eq!(Granularity::Year.coarser(), None);
    }

    #[test]
    fn test_serde_uses_uppercase_names() {
        let json = serde_json::to_string(&Granularity::Minute).unwrap();
        assert_eq!(json, "\"MINUTE\"");
        let g: Granularity = serde_json::from_str("\"DAY\"").unwrap();
        assert_eq!(g, Granularity::Day);
    }
}
