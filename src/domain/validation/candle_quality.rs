use chrono::{DateTime, Duration, FixedOffset};
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::calendar;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

/// Why a candle was dropped. Used as the label on the drop counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleFault {
    NonPositivePrice,
    OhlcOrdering,
    NegativeVolume,
    Misaligned,
    OutsideSession,
    NonTradingDay,
    FutureTimestamp,
}

impl CandleFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleFault::NonPositivePrice => "non_positive_price",
            CandleFault::OhlcOrdering => "ohlc_ordering",
            CandleFault::NegativeVolume => "negative_volume",
            CandleFault::Misaligned => "misaligned",
            CandleFault::OutsideSession => "outside_session",
            CandleFault::NonTradingDay => "non_trading_day",
            CandleFault::FutureTimestamp => "future_timestamp",
        }
    }
}

/// Clock-skew slack allowed on "not in the future".
const FUTURE_SLACK: Duration = Duration::hours(1);

/// Stateless filter enforcing the candle invariants on every entry point.
///
/// Failing candles are dropped individually, never rejected en masse.
pub struct CandleQualityFilter;

impl CandleQualityFilter {
    /// Validates one candle against the invariants. `now` anchors the
    /// future-timestamp check.
    pub fn validate(candle: &Candle, now: DateTime<FixedOffset>) -> Result<(), CandleFault> {
        // Decimal cannot represent NaN or infinity, so finiteness reduces to
        // the positivity check.
        if candle.open <= Decimal::ZERO
            || candle.high <= Decimal::ZERO
            || candle.low <= Decimal::ZERO
            || candle.close <= Decimal::ZERO
        {
            return Err(CandleFault::NonPositivePrice);
        }

        if candle.low > candle.high
            || candle.low > candle.open
            || candle.low > candle.close
            || candle.open > candle.high
            || candle.close > candle.high
        {
            return Err(CandleFault::OhlcOrdering);
        }

        if candle.volume < Decimal::ZERO {
            return Err(CandleFault::NegativeVolume);
        }

        if candle.start_ts > now + FUTURE_SLACK {
            return Err(CandleFault::FutureTimestamp);
        }

        if !candle.timeframe.is_grid_aligned(candle.start_ts) {
            return Err(CandleFault::Misaligned);
        }

        if candle.timeframe.is_intraday() {
            if !calendar::session_contains_candle(candle.start_ts, candle.timeframe.step_secs()) {
                return Err(CandleFault::OutsideSession);
            }
        } else if candle.timeframe == Timeframe::OneDay
            && !calendar::is_trading_day(candle.start_ts.date_naive())
        {
            return Err(CandleFault::NonTradingDay);
        }

        Ok(())
    }

    /// Validates one candle and logs the fault when it fails; the batch
    /// entry points drop failing candles individually.
    pub fn check(candle: &Candle, now: DateTime<FixedOffset>) -> Option<CandleFault> {
        match Self::validate(candle, now) {
            Ok(()) => None,
            Err(fault) => {
                warn!(
                    "Dropping candle {} {} @ {}: {}",
                    candle.symbol,
                    candle.timeframe,
                    candle.start_ts,
                    fault.as_str()
                );
                Some(fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle_at(h: u32, m: u32) -> Candle {
        Candle {
            symbol: "INFY.NS".to_string(),
            timeframe: Timeframe::FiveMin,
            start_ts: calendar::ist()
                .with_ymd_and_hms(2025, 7, 9, h, m, 0)
                .unwrap(),
            open: dec!(1500),
            high: dec!(1510),
            low: dec!(1495),
            close: dec!(1505),
            volume: dec!(10000),
        }
    }

    fn now() -> DateTime<FixedOffset> {
        calendar::ist().with_ymd_and_hms(2025, 7, 9, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_candle_passes() {
        assert!(CandleQualityFilter::validate(&candle_at(10, 0), now()).is_ok());
    }

    #[test]
    fn test_zero_price_dropped() {
        let mut c = candle_at(10, 0);
        c.open = Decimal::ZERO;
        assert_eq!(
            CandleQualityFilter::validate(&c, now()),
            Err(CandleFault::NonPositivePrice)
        );
    }

    #[test]
    fn test_low_above_close_dropped() {
        let mut c = candle_at(10, 0);
        c.low = dec!(1506);
        c.high = dec!(1510);
        assert_eq!(
            CandleQualityFilter::validate(&c, now()),
            Err(CandleFault::OhlcOrdering)
        );
    }

    #[test]
    fn test_pre_open_candle_is_off_grid() {
        // The intraday grid is anchored at 09:15; a 09:00 candle never sits
        // on it.
        let c = candle_at(9, 0);
        assert_eq!(
            CandleQualityFilter::validate(&c, now()),
            Err(CandleFault::Misaligned)
        );
    }

    #[test]
    fn test_candle_spilling_past_close_dropped() {
        // 15:30 is on the grid but the candle would close at 15:35.
        let c = candle_at(15, 30);
        assert_eq!(
            CandleQualityFilter::validate(&c, now()),
            Err(CandleFault::OutsideSession)
        );
    }

    #[test]
    fn test_off_grid_candle_dropped() {
        let mut c = candle_at(10, 0);
        c.start_ts += Duration::seconds(90);
        assert_eq!(
            CandleQualityFilter::validate(&c, now()),
            Err(CandleFault::Misaligned)
        );
    }

    #[test]
    fn test_future_candle_dropped_beyond_slack() {
        let c = candle_at(10, 0);
        let past_now = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 8, 30, 0)
            .unwrap();
        // 10:00 start vs 08:30 clock is outside the one-hour slack.
        assert_eq!(
            CandleQualityFilter::validate(&c, past_now),
            Err(CandleFault::FutureTimestamp)
        );
        // Within slack it survives the future check (and the rest).
        let near_now = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 9, 30, 0)
            .unwrap();
        assert!(CandleQualityFilter::validate(&c, near_now).is_ok());
    }

    #[test]
    fn test_check_reports_fault_per_candle() {
        let good = candle_at(10, 0);
        let mut bad = candle_at(10, 5);
        bad.close = dec!(-1);
        assert_eq!(CandleQualityFilter::check(&good, now()), None);
        assert_eq!(
            CandleQualityFilter::check(&bad, now()),
            Some(CandleFault::NonPositivePrice)
        );
    }
}
