//! Built-in calendars

use super::TradingCalendar;
use chrono::{Datelike, NaiveDate, Weekday};

/// Every day is a full 1440-minute session
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpenCalendar;

impl TradingCalendar for AlwaysOpenCalendar {
    fn name(&self) -> &str {
        "OPEN"
    }

    fn is_session(&self, _date: NaiveDate) -> bool {
        true
    }
}

/// Monday to Friday, full UTC days
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

impl TradingCalendar for WeekdayCalendar {
    fn name(&self) -> &str {
        "WEEKDAYS"
    }

    fn is_session(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}
