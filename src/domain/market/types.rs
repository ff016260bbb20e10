use chrono::{DateTime, Duration, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;

/// One OHLCV bar. Identity is `(symbol, timeframe, start_ts)`; the Candle
/// Store carries a uniqueness constraint on that triple.
///
/// `start_ts` keeps the IST offset end to end: the wire representation is
/// RFC 3339 with `+05:30` preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ts: DateTime<FixedOffset>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// The instant at which this candle's grid period closes and the candle
    /// becomes immutable.
    pub fn period_close(&self) -> DateTime<FixedOffset> {
        self.start_ts + Duration::seconds(self.timeframe.step_secs())
    }

    /// Value equality ignoring identity: used by the store to decide whether
    /// an upsert for an existing triple is a no-op or a live-candle rewrite.
    pub fn same_values(&self, other: &Candle) -> bool {
        self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
    }
}

/// A broadcast topic: one `(symbol, timeframe)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl Topic {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

/// Validates the venue suffix on a symbol (`.NS` for NSE, `.BO` for BSE).
pub fn has_known_venue(symbol: &str) -> bool {
    let base_len = symbol
        .strip_suffix(".NS")
        .or_else(|| symbol.strip_suffix(".BO"))
        .map(|base| base.len());
    matches!(base_len, Some(n) if n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_candle() -> Candle {
        Candle {
            symbol: "INFY.NS".to_string(),
            timeframe: Timeframe::FiveMin,
            start_ts: calendar::ist()
                .with_ymd_and_hms(2025, 7, 9, 10, 0, 0)
                .unwrap(),
            open: dec!(1500),
            high: dec!(1510),
            low: dec!(1495),
            close: dec!(1505),
            volume: dec!(10000),
        }
    }

    #[test]
    fn test_period_close() {
        let c = sample_candle();
        assert_eq!(c.period_close() - c.start_ts, Duration::minutes(5));
    }

    #[test]
    fn test_same_values_ignores_nothing_material() {
        let a = sample_candle();
        let mut b = a.clone();
        assert!(a.same_values(&b));
        b.close = dec!(1506);
        assert!(!a.same_values(&b));
    }

    #[test]
    fn test_wire_format_preserves_offset() {
        let c = sample_candle();
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("+05:30"), "got: {}", json);
        assert!(json.contains("\"timeframe\":\"5m\""));
        let back: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_venue_suffix() {
        assert!(has_known_venue("INFY.NS"));
        assert!(has_known_venue("RELIANCE.BO"));
        assert!(!has_known_venue("AAPL"));
        assert!(!has_known_venue(".NS"));
    }
}
