// US Stock Market Calendar
// Session hours with weekend, holiday and early-close handling

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;

// NYSE/NASDAQ holidays as (year, month, day). Needs an annual refresh.
const MARKET_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 1),   // New Year's Day
    (2024, 1, 15),  // Martin Luther King Jr. Day
    (2024, 2, 19),  // Presidents Day
    (2024, 3, 29),  // Good Friday
    (2024, 5, 27),  // Memorial Day
    (2024, 6, 19),  // Juneteenth
    (2024, 7, 4),   // Independence Day
    (2024, 9, 2),   // Labor Day
    (2024, 11, 28), // Thanksgiving
    (2024, 12, 25), // Christmas
    // 2025
    (2025, 1, 1),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3), // Independence Day (observed)
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

// 1:00 PM ET close
const EARLY_CLOSE_DAYS: &[(i32, u32, u32)] = &[
    (2024, 7, 3),
    (2024, 11, 29),
    (2024, 12, 24),
    (2025, 7, 3),
    (2025, 11, 28),
    (2025, 12, 24),
    (2026, 7, 2),
    (2026, 11, 27),
    (2026, 12, 24),
];

const MARKET_OPEN_MINUTES: u32 = 9 * 60 + 30; // 9:30 AM ET
const MARKET_CLOSE_MINUTES: u32 = 16 * 60; // 4:00 PM ET
const EARLY_CLOSE_MINUTES: u32 = 13 * 60; // 1:00 PM ET

fn contains(days: &[(i32, u32, u32)], date: NaiveDate) -> bool {
    days.iter()
        .any(|&(y, m, d)| (y, m, d) == (date.year(), date.month(), date.day()))
}

pub fn is_market_holiday(date: NaiveDate) -> bool {
    contains(MARKET_HOLIDAYS, date)
}

pub fn is_early_close_day(date: NaiveDate) -> bool {
    contains(EARLY_CLOSE_DAYS, date)
}

/// True when the given instant falls inside a regular trading session.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let eastern = now.with_timezone(&New_York);
    let date = eastern.date_naive();

    if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    if is_market_holiday(date) {
        return false;
    }

    let minutes = eastern.hour() * 60 + eastern.minute();
    (MARKET_OPEN_MINUTES..=close_minutes(date)).contains(&minutes)
}

fn close_minutes(date: NaiveDate) -> u32 {
    if is_early_close_day(date) {
        EARLY_CLOSE_MINUTES
    } else {
        MARKET_CLOSE_MINUTES
    }
}

/// Session close for the given date in ET, 1:00 PM on early-close days.
pub fn market_close_time(date: NaiveDate) -> NaiveTime {
    let minutes = close_minutes(date);
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default())
}

/// True when the date is neither a weekend nor a holiday.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !is_market_holiday(date)
}

/// First trading day strictly after `from`.
pub fn next_trading_day(from: NaiveDate) -> NaiveDate {
    let mut date = from;
    loop {
        match date.succ_opt() {
            Some(next) => date = next,
            None => return date,
        }
        if is_trading_day(date) {
            return date;
        }
    }
}

/// Last trading day strictly before `from`.
pub fn previous_trading_day(from: NaiveDate) -> NaiveDate {
    let mut date = from;
    loop {
        match date.pred_opt() {
            Some(prev) => date = prev,
            None => return date,
        }
        if is_trading_day(date) {
            return date;
        }
    }
}

/// Calendar date in US Eastern time for the given instant. Analysis windows
/// are anchored to the exchange's calendar day, not UTC.
pub fn eastern_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}
