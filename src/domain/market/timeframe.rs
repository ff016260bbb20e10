use anyhow::{Result, anyhow};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::domain::calendar;

/// Candle timeframes supported by the service.
///
/// Each timeframe has a fixed grid step and a fixed history window; both are
/// part of the provider contract and of the cache key format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Timeframe {
    /// Grid step in seconds. Monthly candles use the nominal ~30 day step.
    pub fn step_secs(&self) -> i64 {
        match self {
            Timeframe::OneMin => 60,
            Timeframe::FiveMin => 300,
            Timeframe::FifteenMin => 900,
            Timeframe::OneHour => 3_600,
            Timeframe::FourHour => 14_400,
            Timeframe::OneDay => 86_400,
            Timeframe::OneWeek => 604_800,
            Timeframe::OneMonth => 2_592_000,
        }
    }

    pub fn step_minutes(&self) -> i64 {
        self.step_secs() / 60
    }

    /// Fixed history window fetched from providers for this timeframe.
    pub fn window_days(&self) -> i64 {
        match self {
            Timeframe::OneMin => 7,
            Timeframe::FiveMin | Timeframe::FifteenMin => 60,
            Timeframe::OneHour | Timeframe::FourHour => 730,
            Timeframe::OneDay => 730,
            Timeframe::OneWeek => 1_825,
            Timeframe::OneMonth => 3_650,
        }
    }

    /// Label naming the history window, used as the third cache-key segment.
    pub fn window_label(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "7d",
            Timeframe::FiveMin | Timeframe::FifteenMin => "60d",
            Timeframe::OneHour | Timeframe::FourHour => "730d",
            Timeframe::OneDay => "2y",
            Timeframe::OneWeek => "5y",
            Timeframe::OneMonth => "10y",
        }
    }

    /// True for timeframes whose candles live inside a single trading session.
    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Timeframe::OneMin
                | Timeframe::FiveMin
                | Timeframe::FifteenMin
                | Timeframe::OneHour
                | Timeframe::FourHour
        )
    }

    /// Seconds between scheduled prediction emissions for this timeframe.
    /// Intraday timeframes emit once per grid step; daily and above hourly.
    pub fn prediction_interval_secs(&self) -> u64 {
        (self.step_secs().min(3_600)) as u64
    }

    /// Converts to the Yahoo Finance chart API interval string.
    pub fn to_yahoo_interval(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            // Yahoo has no 4h interval; the provider fetches 1h and aggregates.
            Timeframe::FourHour => "1h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1wk",
            Timeframe::OneMonth => "1mo",
        }
    }

    /// Converts to the Twelve Data time-series interval string.
    pub fn to_twelvedata_interval(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1min",
            Timeframe::FiveMin => "5min",
            Timeframe::FifteenMin => "15min",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1day",
            Timeframe::OneWeek => "1week",
            Timeframe::OneMonth => "1month",
        }
    }

    /// All timeframes in ascending step order.
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
            Timeframe::OneWeek,
            Timeframe::OneMonth,
        ]
    }

    /// Checks whether `ts` sits on this timeframe's grid.
    ///
    /// Intraday grids are anchored at the session open (09:15 IST), so hourly
    /// NSE bars land on 09:15, 10:15, ... rather than on the wall-clock hour.
    /// Daily candles are accepted at midnight or at session open (providers
    /// differ); weekly candles start on Monday; monthly candles on the 1st.
    pub fn is_grid_aligned(&self, ts: DateTime<FixedOffset>) -> bool {
        if ts.second() != 0 || ts.timestamp_subsec_millis() != 0 {
            return false;
        }
        match self {
            tf if tf.is_intraday() => {
                let open = calendar::session_open(ts.date_naive());
                let offset = ts.timestamp() - open.timestamp();
                offset >= 0 && offset % tf.step_secs() == 0
            }
            Timeframe::OneDay => {
                let midnight = ts.hour() == 0 && ts.minute() == 0;
                let at_open = ts.hour() == calendar::SESSION_OPEN_HOUR
                    && ts.minute() == calendar::SESSION_OPEN_MINUTE;
                midnight || at_open
            }
            Timeframe::OneWeek => {
                ts.weekday() == Weekday::Mon && ts.hour() == 0 && ts.minute() == 0
            }
            Timeframe::OneMonth => ts.day() == 1 && ts.hour() == 0 && ts.minute() == 0,
            _ => unreachable!(),
        }
    }

    /// Floors `ts` to the start of the grid period containing it.
    ///
    /// For intraday timeframes the grid is anchored at that day's session
    /// open; an instant before the open floors to the open itself (the first
    /// candle of the day).
    pub fn period_start(&self, ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            tf if tf.is_intraday() => {
                let open = calendar::session_open(ts.date_naive());
                let offset = (ts.timestamp() - open.timestamp()).max(0);
                let floored = offset - offset % tf.step_secs();
                open + Duration::seconds(floored)
            }
            Timeframe::OneDay => calendar::midnight(ts.date_naive()),
            Timeframe::OneWeek => {
                let days_from_monday = ts.weekday().num_days_from_monday() as i64;
                calendar::midnight(ts.date_naive() - Duration::days(days_from_monday))
            }
            Timeframe::OneMonth => {
                let first = NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
                    .expect("first of month is always a valid date");
                calendar::midnight(first)
            }
            _ => unreachable!(),
        }
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "60m" => Ok(Timeframe::OneHour),
            "4h" | "240m" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            "1wk" | "1w" => Ok(Timeframe::OneWeek),
            "1mo" | "1month" => Ok(Timeframe::OneMonth),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 15m, 1h, 4h, 1d, 1wk, 1mo",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1wk",
            Timeframe::OneMonth => "1mo",
        };
        write!(f, "{}", s)
    }
}

// Wire format is the canonical short string ("5m"), not the variant name.
impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Maps epoch seconds to an IST instant.
pub fn ist_datetime(secs: i64) -> DateTime<FixedOffset> {
    calendar::ist()
        .timestamp_opt(secs, 0)
        .single()
        .expect("epoch seconds map to a unique IST instant")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_secs() {
        assert_eq!(Timeframe::OneMin.step_secs(), 60);
        assert_eq!(Timeframe::FiveMin.step_secs(), 300);
        assert_eq!(Timeframe::OneHour.step_secs(), 3600);
        assert_eq!(Timeframe::OneWeek.step_secs(), 604_800);
    }

    #[test]
    fn test_window_labels() {
        assert_eq!(Timeframe::OneMin.window_label(), "7d");
        assert_eq!(Timeframe::FiveMin.window_label(), "60d");
        assert_eq!(Timeframe::OneDay.window_label(), "2y");
        assert_eq!(Timeframe::OneMonth.window_label(), "10y");
    }

    #[test]
    fn test_from_str_round_trip() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::from_str(&tf.to_string()).unwrap(), tf);
        }
        assert!(Timeframe::from_str("3h").is_err());
    }

    #[test]
    fn test_serde_uses_short_string() {
        let json = serde_json::to_string(&Timeframe::FiveMin).unwrap();
        assert_eq!(json, "\"5m\"");
        let back: Timeframe = serde_json::from_str("\"1wk\"").unwrap();
        assert_eq!(back, Timeframe::OneWeek);
    }

    #[test]
    fn test_intraday_grid_anchored_at_session_open() {
        // Wednesday 2025-07-09, session opens 09:15 IST.
        let open = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 9, 15, 0)
            .unwrap();
        assert!(Timeframe::FiveMin.is_grid_aligned(open));
        assert!(Timeframe::OneHour.is_grid_aligned(open + Duration::hours(1)));
        // 10:00 is not on the hourly NSE grid (anchor is 09:15).
        let ten = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 10, 0, 0)
            .unwrap();
        assert!(!Timeframe::OneHour.is_grid_aligned(ten));
        // ...but it is on the 5m and 15m grids.
        assert!(Timeframe::FiveMin.is_grid_aligned(ten));
        assert!(Timeframe::FifteenMin.is_grid_aligned(ten));
    }

    #[test]
    fn test_period_start_floors_within_session() {
        let ts = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 10, 7, 30)
            .unwrap();
        let start = Timeframe::FiveMin.period_start(ts);
        assert_eq!(
            start,
            calendar::ist()
                .with_ymd_and_hms(2025, 7, 9, 10, 5, 0)
                .unwrap()
        );
        let hour_start = Timeframe::OneHour.period_start(ts);
        assert_eq!(
            hour_start,
            calendar::ist()
                .with_ymd_and_hms(2025, 7, 9, 9, 15, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_weekly_and_monthly_alignment() {
        let monday = calendar::ist()
            .with_ymd_and_hms(2025, 7, 7, 0, 0, 0)
            .unwrap();
        assert!(Timeframe::OneWeek.is_grid_aligned(monday));
        let tuesday = monday + Duration::days(1);
        assert!(!Timeframe::OneWeek.is_grid_aligned(tuesday));
        assert_eq!(Timeframe::OneWeek.period_start(tuesday), monday);

        let mid_month = calendar::ist()
            .with_ymd_and_hms(2025, 7, 18, 11, 0, 0)
            .unwrap();
        let first = calendar::ist()
            .with_ymd_and_hms(2025, 7, 1, 0, 0, 0)
            .unwrap();
        assert_eq!(Timeframe::OneMonth.period_start(mid_month), first);
    }
}
