//! Clinic-local calendar handling
//!
//! Daily closes and leak summaries are keyed by the clinic's business date,
//! not the UTC date. This module converts a business date into the UTC
//! half-open window `[start, end)` that storage queries filter on.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Timezone wrapper for the clinic's operating location
///
/// Wraps chrono_tz::Tz with string serialization ("Africa/Lagos").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for Timezone {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s)
            .map(Timezone)
            .map_err(|_| TemporalError::UnknownTimezone(s.to_string()))
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// IANA name of the zone
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Converts a UTC datetime to the local timezone
    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.0)
    }

    /// Returns the clinic-local calendar date of a UTC instant
    pub fn business_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        self.to_local(utc).date_naive()
    }

    /// Gets the first instant of a local day as UTC
    ///
    /// When midnight falls in a DST gap the first valid local instant after
    /// it is used; when it is ambiguous the earlier mapping wins.
    pub fn start_of_day(&self, date: NaiveDate) -> Result<DateTime<Utc>, TemporalError> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or(TemporalError::NonexistentLocalTime(date))?;
        let local = match self.0.from_local_datetime(&midnight) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                let shifted = midnight + Duration::hours(1);
                self.0
                    .from_local_datetime(&shifted)
                    .earliest()
                    .ok_or(TemporalError::NonexistentLocalTime(date))?
            }
        };
        Ok(local.with_timezone(&Utc))
    }

    /// Returns the UTC window covering one local business day
    pub fn day_window(&self, date: NaiveDate) -> Result<DayWindow, TemporalError> {
        let next = date
            .succ_opt()
            .ok_or(TemporalError::NonexistentLocalTime(date))?;
        DayWindow::new(date, self.start_of_day(date)?, self.start_of_day(next)?)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must be before end {end}")]
    InvalidPeriod {
        start: String,
        end: String,
    },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Local midnight of {0} cannot be mapped to an instant")]
    NonexistentLocalTime(NaiveDate),
}

/// One clinic business day as a half-open UTC interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub date: NaiveDate,
    /// First instant of the day (inclusive)
    pub start: DateTime<Utc>,
    /// First instant of the following day (exclusive)
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(date: NaiveDate, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TemporalError> {
        if start >= end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { date, start, end })
    }

    /// UTC calendar day, for callers that do not care about local time
    pub fn utc(date: NaiveDate) -> Result<Self, TemporalError> {
        Timezone::default().day_window(date)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_utc_day_window_spans_24_hours() {
        let window = DayWindow::utc(date(2026, 3, 2)).unwrap();
        assert_eq!(window.end - window.start, Duration::hours(24));
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_lagos_day_window_is_offset() {
        let tz: Timezone = "Africa/Lagos".parse().unwrap();
        let window = tz.day_window(date(2026, 3, 2)).unwrap();
        assert_eq!(window.start.to_rfc3339(), "2026-03-01T23:00:00+00:00");
    }

    #[test]
    fn test_business_date_crosses_utc_midnight() {
        let tz: Timezone = "Africa/Lagos".parse().unwrap();
        let late_utc = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(tz.business_date(late_utc), date(2026, 3, 2));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        assert!(matches!(
            "Mars/Olympus".parse::<Timezone>(),
            Err(TemporalError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_dst_day_is_short() {
        let tz: Timezone = "America/New_York".parse().unwrap();
        let window = tz.day_window(date(2026, 3, 8)).unwrap();
        assert_eq!(window.end - window.start, Duration::hours(23));
    }
}
