//! Bar sampling granularity

use crate::calendar::TradingCalendar;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sampling resolution of a bar store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Daily,
}

/// Raised for any granularity other than minute or daily
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid granularity '{0}', expected 'minute' or 'daily'")]
pub struct ParseGranularityError(pub String);

impl Granularity {
    /// Name used in bundle paths (`{frequency}_bundle`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Daily => "daily",
        }
    }

    /// Length of one bar
    pub fn bar_duration(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Daily => Duration::days(1),
        }
    }

    /// Floor a timestamp to the open of the bar containing it
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Minute => {
                let secs = ts.timestamp();
                DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(ts)
            }
            Granularity::Daily => ts.date_naive().and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Every bar open in `[start, end]` that the calendar expects
    pub fn periods_in_range(
        &self,
        calendar: &dyn TradingCalendar,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        if start > end {
            return Vec::new();
        }
        match self {
            Granularity::Minute => calendar.minutes_in_range(start, end),
            Granularity::Daily => calendar
                .sessions_in_range(start.date_naive(), end.date_naive())
                .into_iter()
                .map(|day| day.and_time(NaiveTime::MIN).and_utc())
                .collect(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "1m" => Ok(Granularity::Minute),
            "daily" | "1d" => Ok(Granularity::Daily),
            _ => Err(ParseGranularityError(s.to_string())),
        }
    }
}
