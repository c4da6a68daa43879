//! Monthly chunk planning

use super::coverage::range_in_bundle;
use super::dates::{adjust_dates, last_session_date};
use super::Chunk;
use crate::asset::Asset;
use crate::calendar::TradingCalendar;
use crate::candle::Granularity;
use crate::store::BarReader;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashSet;

/// Plan the calendar-month chunks still missing from the store
///
/// Each asset gets its own adjusted range. Its sessions are walked day by
/// day, one candidate per calendar month; a month whose clamped window is
/// not fully covered becomes a chunk. Chunks come back ordered by
/// `period_end` across all assets.
pub fn plan_chunks(
    assets: &[Asset],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    granularity: Granularity,
    calendar: &dyn TradingCalendar,
    reader: Option<&dyn BarReader>,
    now: DateTime<Utc>,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for asset in assets {
        let (asset_start, asset_end) =
            match adjust_dates(start, end, std::slice::from_ref(asset), now) {
                Ok(range) => range,
                Err(e) => {
                    tracing::debug!(symbol = %asset.symbol, error = %e, "Nothing to ingest");
                    continue;
                }
            };

        let sessions =
            calendar.sessions_in_range(asset_start.date_naive(), last_session_date(asset_end));
        let (Some(first), Some(last)) = (sessions.first(), sessions.last()) else {
            continue;
        };

        let mut seen = HashSet::new();
        for day in first.iter_days().take_while(|day| day <= last) {
            let period = format!("{}-{}", day.year(), day.month());
            if !seen.insert(period.clone()) {
                continue;
            }

            let month_start = first_of_month(day);
            let next_month = first_of_next_month(day);
            let window_start = asset_start.max(midnight(month_start));
            let window_end = asset_end.min(midnight(next_month)) - Duration::nanoseconds(1);

            if range_in_bundle(asset, window_start, window_end, reader) {
                tracing::debug!(symbol = %asset.symbol, period = %period, "Already in bundle");
                continue;
            }

            chunks.push(Chunk {
                asset: asset.clone(),
                granularity,
                period,
                period_end: next_month - Duration::days(1),
                window_start,
                window_end,
            });
        }
    }

    chunks.sort_by_key(|chunk| chunk.period_end);
    tracing::debug!(count = chunks.len(), granularity = %granularity, "Planned chunks");
    chunks
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn first_of_next_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
}
