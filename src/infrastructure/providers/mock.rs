//! Deterministic in-process provider for tests and offline runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::calendar;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;
use crate::domain::ports::MarketDataProvider;

/// Serves a fixed candle list (tests) or a synthetic random-walk history
/// (offline runs). Counts upstream invocations so coalescing behavior is
/// observable.
pub struct MockProvider {
    name: String,
    canned: Mutex<Option<Vec<Candle>>>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Generates a synthetic session-aligned history per request.
    pub fn synthetic() -> Self {
        Self {
            name: "mock".to_string(),
            canned: Mutex::new(None),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns exactly `candles`.
    pub fn with_candles(name: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            name: name.into(),
            canned: Mutex::new(Some(candles)),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always errors, for fallback tests.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            canned: Mutex::new(None),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Walks backwards from the current grid period over trading sessions,
    /// producing a gentle deterministic price path.
    fn generate(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        let now = calendar::now_ist();
        let count = 240usize;
        let step = timeframe.step_secs();

        let mut starts = Vec::with_capacity(count);
        let mut cursor = timeframe.period_start(now);
        while starts.len() < count {
            let in_scope = match timeframe {
                tf if tf.is_intraday() => calendar::session_contains_candle(cursor, step),
                Timeframe::OneDay => calendar::is_trading_day(cursor.date_naive()),
                _ => true,
            };
            if in_scope {
                starts.push(cursor);
            }
            cursor -= ChronoDuration::seconds(step);
            if !timeframe.is_intraday() {
                // Re-snap so monthly steps stay on calendar boundaries.
                cursor = timeframe.period_start(cursor);
            }
            // Synthetic history never needs to reach past the window.
            if now.signed_duration_since(cursor).num_days() > timeframe.window_days() {
                break;
            }
        }
        starts.reverse();

        let base = 1000.0
            + (symbol.bytes().map(|b| b as u64).sum::<u64>() % 2000) as f64;
        let mut price = base;
        starts
            .into_iter()
            .enumerate()
            .map(|(i, start_ts)| {
                let wave = (i as f64 * 0.37).sin() * base * 0.002;
                let open = price;
                let close = price + wave;
                let high = open.max(close) * 1.001;
                let low = open.min(close) * 0.999;
                price = close;
                Candle {
                    symbol: symbol.to_string(),
                    timeframe,
                    start_ts,
                    open: Decimal::from_f64(open).unwrap_or_default(),
                    high: Decimal::from_f64(high).unwrap_or_default(),
                    low: Decimal::from_f64(low).unwrap_or_default(),
                    close: Decimal::from_f64(close).unwrap_or_default(),
                    volume: Decimal::from((1000 + i * 10) as u64),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("mock provider {} configured to fail", self.name);
        }
        let canned = self.canned.lock().expect("mock candle lock").clone();
        Ok(match canned {
            Some(candles) => candles,
            None => self.generate(symbol, timeframe),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_candles_and_call_count() {
        let provider = MockProvider::with_candles("a", vec![]);
        assert_eq!(provider.call_count(), 0);
        let out = provider
            .fetch_candles("INFY.NS", Timeframe::FiveMin)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_provider_errors() {
        let provider = MockProvider::failing("down");
        assert!(
            provider
                .fetch_candles("INFY.NS", Timeframe::FiveMin)
                .await
                .is_err()
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_synthetic_history_is_ascending_and_positive() {
        let provider = MockProvider::synthetic();
        let out = provider
            .fetch_candles("INFY.NS", Timeframe::FiveMin)
            .await
            .unwrap();
        assert!(!out.is_empty());
        for pair in out.windows(2) {
            assert!(pair[0].start_ts < pair[1].start_ts);
        }
        assert!(out.iter().all(|c| c.low > Decimal::ZERO));
    }
}
