//! Trading calendar capability.
//!
//! The synchronizer only needs one shape from a calendar: the ordered
//! sessions between two dates, with their close times. The algorithm behind
//! it is not contractual — anything implementing [`TradingCalendar`] can be
//! substituted, and tests script their own.
//!
//! [`UsEquityCalendar`] is the shipped implementation: weekdays minus a
//! fixed table of US market holidays, 16:00 close. Deterministic, no IO,
//! no wall clock.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

/// One trading session on the reference exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub date: NaiveDate,
    pub close_time: NaiveTime,
}

/// Produces the ordered sequence of valid trading sessions in a date range.
pub trait TradingCalendar: Send + Sync {
    /// Sessions in `[start, end]`, inclusive on both endpoints, ascending.
    fn sessions_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session>;
}

/// US equity sessions: Monday–Friday, 16:00 close, minus the holiday table.
///
/// The holiday table covers 2023–2026. Dates outside the table fall back to
/// pure weekday logic, which overcounts sessions slightly — acceptable for
/// staleness detection, where an extra phantom session only triggers a
/// harmless compact fetch.
#[derive(Debug, Default)]
pub struct UsEquityCalendar;

/// US market holidays, 2023–2026 (observed dates).
const US_MARKET_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2023
    (2023, 1, 2),
    (2023, 1, 16),
    (2023, 2, 20),
    (2023, 4, 7),
    (2023, 5, 29),
    (2023, 6, 19),
    (2023, 7, 4),
    (2023, 9, 4),
    (2023, 11, 23),
    (2023, 12, 25),
    // 2024
    (2024, 1, 1),
    (2024, 1, 15),
    (2024, 2, 19),
    (2024, 3, 29),
    (2024, 5, 27),
    (2024, 6, 19),
    (2024, 7, 4),
    (2024, 9, 2),
    (2024, 11, 28),
    (2024, 12, 25),
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
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

impl UsEquityCalendar {
    fn is_session(date: NaiveDate) -> bool {
        let weekday = date.weekday();
        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            return false;
        }
        !US_MARKET_HOLIDAYS
            .iter()
            .any(|&(y, m, d)| date.year() == y && date.month() == m && date.day() == d)
    }

    fn close_time() -> NaiveTime {
        NaiveTime::from_hms_opt(16, 0, 0).unwrap()
    }
}

impl TradingCalendar for UsEquityCalendar {
    fn sessions_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session> {
        let mut sessions = Vec::new();
        let mut date = start;
        while date <= end {
            if Self::is_session(date) {
                sessions.push(Session {
                    date,
                    close_time: Self::close_time(),
                });
            }
            date += chrono::Duration::days(1);
        }
        sessions
    }
}
