//! Trading calendar module
//!
//! Session and minute enumeration for bar stores. Crypto venues trade
//! around the clock, so the default calendar is always open.

mod builtin;

pub use builtin::{AlwaysOpenCalendar, WeekdayCalendar};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;

/// Minutes in a full UTC day
pub const MINUTES_PER_DAY: u32 = 1440;

/// Trait for trading calendar implementations
pub trait TradingCalendar: Send + Sync + std::fmt::Debug {
    /// Registry name, persisted in store metadata
    fn name(&self) -> &str;

    /// Whether `date` is a trading session
    fn is_session(&self, date: NaiveDate) -> bool;

    /// Number of minute bars in one session
    fn minutes_per_day(&self) -> u32 {
        MINUTES_PER_DAY
    }

    /// Sessions in `[start, end]`, ascending
    fn sessions_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| self.is_session(*day))
            .collect()
    }

    /// Minute bar opens of one session, starting at UTC midnight
    fn minutes_for_session(&self, session: NaiveDate) -> Vec<DateTime<Utc>> {
        let open = session.and_time(NaiveTime::MIN).and_utc();
        (0..i64::from(self.minutes_per_day()))
            .map(|m| open + Duration::minutes(m))
            .collect()
    }

    /// Minute bar opens in `[start, end]`, ascending
    fn minutes_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.sessions_in_range(start.date_naive(), end.date_naive())
            .into_iter()
            .flat_map(|session| self.minutes_for_session(session))
            .filter(|minute| *minute >= start && *minute <= end)
            .collect()
    }
}

/// Look up a calendar by its registry name
pub fn get_calendar(name: &str) -> Option<Arc<dyn TradingCalendar>> {
    match name.to_ascii_uppercase().as_str() {
        "OPEN" | "24/7" => Some(Arc::new(AlwaysOpenCalendar)),
        "WEEKDAYS" => Some(Arc::new(WeekdayCalendar)),
        _ => None,
    }
}
