//! Requested window adjustment

use super::BundleError;
use crate::asset::Asset;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Clamp a requested `[start, end)` window to what can exist
///
/// The end is capped at `now`, and the start never precedes the earliest
/// `start_date` among `assets`. `now` is captured once by the caller so a
/// whole run agrees on it.
pub fn adjust_dates(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    assets: &[Asset],
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), BundleError> {
    let end = match end {
        Some(end) if end <= now => end,
        _ => now,
    };

    let earliest = assets.iter().map(|a| a.start_date).min();
    let start = match (start, earliest) {
        (Some(start), Some(earliest)) => start.max(earliest),
        (Some(start), None) => start,
        (None, Some(earliest)) => earliest,
        (None, None) => {
            return Err(BundleError::InvalidRange(
                "no start date and no assets to derive one from".to_string(),
            ))
        }
    };

    if start >= end {
        return Err(BundleError::InvalidRange(format!(
            "start {} is not before end {}",
            start, end
        )));
    }
    Ok((start, end))
}

/// Date of the last session in a half-open window ending at `end`
pub fn last_session_date(end: DateTime<Utc>) -> NaiveDate {
    (end - Duration::nanoseconds(1)).date_naive()
}
