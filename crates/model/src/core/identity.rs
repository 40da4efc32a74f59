use chrono::{Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

const IDENTITY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid record identity '{0}': expected YYYY-MM-DD")]
    Invalid(String),

    #[error("Invalid identity range: {start} is after {end}")]
    InvertedRange {
        start: RecordIdentity,
        end: RecordIdentity,
    },
}

/// Normalized key of a planner record: the calendar day the page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIdentity(NaiveDate);

impl RecordIdentity {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn next(&self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }

    pub fn days_before(&self, days: u64) -> Option<Self> {
        self.0.checked_sub_days(Days::new(days)).map(Self)
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(IDENTITY_FORMAT))
    }
}

impl FromStr for RecordIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), IDENTITY_FORMAT)
            .map(Self)
            .map_err(|_| IdentityError::Invalid(s.to_string()))
    }
}

impl From<NaiveDate> for RecordIdentity {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl Serialize for RecordIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive, contiguous span of identities used for gap detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRange {
    start: RecordIdentity,
    end: RecordIdentity,
}

impl IdentityRange {
    pub fn new(start: RecordIdentity, end: RecordIdentity) -> Result<Self, IdentityError> {
        if start > end {
            return Err(IdentityError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> RecordIdentity {
        self.start
    }

    pub fn end(&self) -> RecordIdentity {
        self.end
    }

    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        *identity >= self.start && *identity <= self.end
    }

    /// Narrows the range so it covers at most `days` days ending at `end`.
    pub fn clip_to_last(self, days: u64) -> Self {
        let floor = match days.checked_sub(1).and_then(|d| self.end.days_before(d)) {
            Some(floor) => floor,
            None => return self,
        };
        Self {
            start: self.start.max(floor),
            end: self.end,
        }
    }

    /// Ascending iterator over every identity in the range.
    pub fn iter(&self) -> impl Iterator<Item = RecordIdentity> + '_ {
        std::iter::successors(Some(self.start), move |cur| {
            cur.next().filter(|next| *next <= self.end)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> RecordIdentity {
        RecordIdentity::from_ymd(2025, 1, d).unwrap()
    }

    #[test]
    fn parses_and_displays_iso_dates() {
        let id: RecordIdentity = "2025-02-01".parse().unwrap();
        assert_eq!(id.to_string(), "2025-02-01");
        assert!("02/01/2025".parse::<RecordIdentity>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&day(5)).unwrap();
        assert_eq!(json, "\"2025-01-05\"");
        let back: RecordIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, day(5));
    }

    #[test]
    fn range_iterates_inclusive() {
        let range = IdentityRange::new(day(1), day(3)).unwrap();
        let all: Vec<_> = range.iter().collect();
        assert_eq!(all, vec![day(1), day(2), day(3)]);
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(IdentityRange::new(day(3), day(1)).is_err());
    }

    #[test]
    fn clip_keeps_last_days() {
        let range = IdentityRange::new(day(1), day(20)).unwrap().clip_to_last(5);
        assert_eq!(range.start(), day(16));
        assert_eq!(range.end(), day(20));

        let untouched = IdentityRange::new(day(1), day(3)).unwrap().clip_to_last(30);
        assert_eq!(untouched.start(), day(1));
    }
}
