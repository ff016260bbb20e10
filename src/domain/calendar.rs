//! NSE/BSE trading calendar.
//!
//! Pure functions over a fixed weekly schedule (Mon-Fri, 09:15-15:30 IST) and
//! an embedded exchange-holiday set. The holiday set is process-wide
//! immutable; updating it requires a redeploy.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Weekday};
use std::collections::HashSet;
use std::sync::LazyLock;

pub const SESSION_OPEN_HOUR: u32 = 9;
pub const SESSION_OPEN_MINUTE: u32 = 15;
pub const SESSION_CLOSE_HOUR: u32 = 15;
pub const SESSION_CLOSE_MINUTE: u32 = 30;

/// Indian Standard Time. No DST, so a fixed offset is exact.
pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).expect("+05:30 is a valid offset")
}

pub fn now_ist() -> DateTime<FixedOffset> {
    chrono::Utc::now().with_timezone(&ist())
}

/// Exchange holidays (both venues observe the same list).
/// (year, month, day) tuples; weekends are handled separately.
const HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 26),
    (2024, 3, 8),
    (2024, 3, 25),
    (2024, 3, 29),
    (2024, 4, 11),
    (2024, 4, 17),
    (2024, 5, 1),
    (2024, 5, 20),
    (2024, 6, 17),
    (2024, 7, 17),
    (2024, 8, 15),
    (2024, 10, 2),
    (2024, 11, 1),
    (2024, 11, 15),
    (2024, 12, 25),
    // 2025
    (2025, 2, 26),
    (2025, 3, 14),
    (2025, 3, 31),
    (2025, 4, 10),
    (2025, 4, 14),
    (2025, 4, 18),
    (2025, 5, 1),
    (2025, 8, 15),
    (2025, 8, 27),
    (2025, 10, 2),
    (2025, 10, 21),
    (2025, 10, 22),
    (2025, 11, 5),
    (2025, 12, 25),
    // 2026
    (2026, 1, 26),
    (2026, 3, 4),
    (2026, 4, 3),
    (2026, 5, 1),
    (2026, 10, 2),
    (2026, 11, 10),
    (2026, 12, 25),
];

static HOLIDAY_SET: LazyLock<HashSet<NaiveDate>> = LazyLock::new(|| {
    HOLIDAYS
        .iter()
        .map(|&(y, m, d)| {
            NaiveDate::from_ymd_opt(y, m, d).expect("embedded holiday dates are valid")
        })
        .collect()
});

pub fn midnight(date: NaiveDate) -> DateTime<FixedOffset> {
    ist()
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        .single()
        .expect("IST has no ambiguous local times")
}

pub fn session_open(date: NaiveDate) -> DateTime<FixedOffset> {
    midnight(date) + Duration::minutes((SESSION_OPEN_HOUR * 60 + SESSION_OPEN_MINUTE) as i64)
}

pub fn session_close(date: NaiveDate) -> DateTime<FixedOffset> {
    midnight(date) + Duration::minutes((SESSION_CLOSE_HOUR * 60 + SESSION_CLOSE_MINUTE) as i64)
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !HOLIDAY_SET.contains(&date)
}

/// Is the exchange accepting orders at this instant?
pub fn is_market_open(ts: DateTime<FixedOffset>) -> bool {
    let ts = ts.with_timezone(&ist());
    let date = ts.date_naive();
    is_trading_day(date) && ts >= session_open(date) && ts < session_close(date)
}

/// The next session-open instant at or after `ts`.
pub fn next_session_open(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let ts = ts.with_timezone(&ist());
    let mut date = ts.date_naive();
    if !is_trading_day(date) || ts >= session_open(date) {
        date += Duration::days(1);
        while !is_trading_day(date) {
            date += Duration::days(1);
        }
    }
    session_open(date)
}

/// Session containment for an intraday candle: the candle's full period must
/// fit inside the trading session, so its close instant lies in
/// (session-open, session-close]. The 09:15 candle is the first valid one;
/// a candle starting at 15:30 is not valid.
pub fn session_contains_candle(start_ts: DateTime<FixedOffset>, step_secs: i64) -> bool {
    let start_ts = start_ts.with_timezone(&ist());
    let date = start_ts.date_naive();
    is_trading_day(date)
        && start_ts >= session_open(date)
        && start_ts + Duration::seconds(step_secs) <= session_close(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekend_is_closed() {
        // Sunday 2025-07-06, 10:00 IST.
        let sunday = ist().with_ymd_and_hms(2025, 7, 6, 10, 0, 0).unwrap();
        assert!(!is_market_open(sunday));
        assert!(!is_trading_day(sunday.date_naive()));
    }

    #[test]
    fn test_session_bounds() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 9).unwrap(); // Wednesday
        assert!(is_trading_day(date));
        let open = session_open(date);
        let close = session_close(date);
        assert!(is_market_open(open));
        assert!(is_market_open(close - Duration::minutes(1)));
        assert!(!is_market_open(close));
        assert!(!is_market_open(open - Duration::minutes(1)));
    }

    #[test]
    fn test_holiday_is_closed() {
        // Christmas 2025 falls on a Thursday.
        let date = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        assert!(!is_trading_day(date));
        let ten_am = session_open(date) + Duration::minutes(45);
        assert!(!is_market_open(ten_am));
    }

    #[test]
    fn test_next_session_open_skips_weekend() {
        // Friday 2025-07-04 at 16:00 -> Monday 2025-07-07 09:15.
        let friday_evening = ist().with_ymd_and_hms(2025, 7, 4, 16, 0, 0).unwrap();
        let next = next_session_open(friday_evening);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());
        assert_eq!(next, session_open(next.date_naive()));
    }

    #[test]
    fn test_next_session_open_same_day_before_open() {
        let early = ist().with_ymd_and_hms(2025, 7, 9, 8, 0, 0).unwrap();
        let next = next_session_open(early);
        assert_eq!(next.date_naive(), early.date_naive());
    }

    #[test]
    fn test_candle_containment_at_boundaries() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 9).unwrap();
        let open = session_open(date);
        // First 5m candle of the day is valid.
        assert!(session_contains_candle(open, 300));
        // Last 5m candle starts 15:25 and closes exactly at 15:30.
        let last = session_close(date) - Duration::minutes(5);
        assert!(session_contains_candle(last, 300));
        // A candle starting at the close would spill past the session.
        assert!(!session_contains_candle(session_close(date), 300));
        // Pre-open candle is invalid.
        assert!(!session_contains_candle(open - Duration::minutes(5), 300));
    }
}
