//! Feature snapshot computed at prediction-emission time.

use rust_decimal::prelude::ToPrimitive;
use ta::Next;
use ta::indicators::{SimpleMovingAverage, StandardDeviation};

use crate::domain::market::prediction::FeatureSnapshot;
use crate::domain::market::types::Candle;

const PERIOD: usize = 20;

/// Candle count that fully warms the snapshot indicators.
pub const MIN_SNAPSHOT_HISTORY: usize = PERIOD;

/// Computes `{latest_close, sma_20, volatility_20, volume_avg}` over the
/// candle history. Returns `None` on an empty history; shorter histories
/// produce partially warmed indicators, which is acceptable for a snapshot.
pub fn compute_snapshot(candles: &[Candle]) -> Option<FeatureSnapshot> {
    let last = candles.last()?;

    let mut sma = SimpleMovingAverage::new(PERIOD).expect("period 20 is valid");
    let mut stddev = StandardDeviation::new(PERIOD).expect("period 20 is valid");

    let mut sma_value = 0.0;
    let mut vol_value = 0.0;
    for candle in candles {
        let close = candle.close.to_f64().unwrap_or(0.0);
        sma_value = sma.next(close);
        vol_value = stddev.next(close);
    }

    let tail = &candles[candles.len().saturating_sub(PERIOD)..];
    let volume_avg = tail
        .iter()
        .map(|c| c.volume.to_f64().unwrap_or(0.0))
        .sum::<f64>()
        / tail.len() as f64;

    Some(FeatureSnapshot {
        latest_close: last.close.to_f64().unwrap_or(0.0),
        sma_20: sma_value,
        volatility_20: vol_value,
        volume_avg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar;
    use crate::domain::market::timeframe::Timeframe;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn history(closes: &[f64]) -> Vec<Candle> {
        let base = calendar::ist()
            .with_ymd_and_hms(2025, 7, 9, 10, 0, 0)
            .unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "INFY.NS".to_string(),
                timeframe: Timeframe::FiveMin,
                start_ts: base + Duration::minutes(5 * i as i64),
                open: Decimal::from_f64(close).unwrap(),
                high: Decimal::from_f64(close + 1.0).unwrap(),
                low: Decimal::from_f64(close - 1.0).unwrap(),
                close: Decimal::from_f64(close).unwrap(),
                volume: Decimal::from(1000),
            })
            .collect()
    }

    #[test]
    fn test_empty_history_is_none() {
        assert!(compute_snapshot(&[]).is_none());
    }

    #[test]
    fn test_constant_series_snapshot() {
        let candles = history(&[1500.0; 40]);
        let snapshot = compute_snapshot(&candles).unwrap();
        assert_eq!(snapshot.latest_close, 1500.0);
        assert!((snapshot.sma_20 - 1500.0).abs() < 1e-9);
        assert!(snapshot.volatility_20.abs() < 1e-9);
        assert!((snapshot.volume_avg - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma_tracks_recent_window() {
        // 20 candles at 100 then 20 at 200: SMA-20 ends at 200.
        let mut closes = vec![100.0; 20];
        closes.extend(vec![200.0; 20]);
        let snapshot = compute_snapshot(&history(&closes)).unwrap();
        assert!((snapshot.sma_20 - 200.0).abs() < 1e-9);
        assert_eq!(snapshot.latest_close, 200.0);
    }
}
