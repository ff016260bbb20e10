//! Mean-reversion bot: decays the price toward its moving average.

use serde_json::json;

use super::{BotForecast, ForecastBot, TrainOutcome, closes, minute_grid};
use crate::domain::market::prediction::ForecastPoint;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

pub struct ReversionBot;

const DEFAULT_PERIOD: usize = 20;
const DEFAULT_RATE: f64 = 0.05;
const RATE_GRID: &[f64] = &[0.02, 0.05, 0.1, 0.2];

impl ReversionBot {
    fn period(params: &serde_json::Value) -> usize {
        params
            .get("period")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|&v| v >= 2)
            .unwrap_or(DEFAULT_PERIOD)
    }

    fn rate(params: &serde_json::Value) -> f64 {
        params
            .get("rate")
            .and_then(|v| v.as_f64())
            .filter(|r| r.is_finite() && (0.0..=1.0).contains(r))
            .unwrap_or(DEFAULT_RATE)
    }

    fn sma(values: &[f64], period: usize) -> f64 {
        let tail = &values[values.len().saturating_sub(period)..];
        tail.iter().sum::<f64>() / tail.len() as f64
    }
}

impl ForecastBot for ReversionBot {
    fn name(&self) -> &str {
        "reversion"
    }

    fn min_history(&self) -> usize {
        DEFAULT_PERIOD
    }

    fn default_params(&self) -> serde_json::Value {
        json!({ "period": DEFAULT_PERIOD, "rate": DEFAULT_RATE })
    }

    fn predict(
        &self,
        candles: &[Candle],
        params: &serde_json::Value,
        horizon_minutes: u32,
        _timeframe: Timeframe,
    ) -> Result<BotForecast, String> {
        let period = Self::period(params);
        if candles.len() < period {
            return Err(format!(
                "reversion needs {} candles, got {}",
                period,
                candles.len()
            ));
        }
        let rate = Self::rate(params);

        let all = closes(candles);
        let anchor = Self::sma(&all, period);
        let last_close = *all.last().expect("non-empty history");
        let last_ts = candles[candles.len() - 1].period_close();

        // Each minute closes a fixed fraction of the gap to the anchor.
        let mut price = last_close;
        let series: Vec<ForecastPoint> = minute_grid(last_ts, horizon_minutes)
            .map(|ts| {
                price += rate * (anchor - price);
                ForecastPoint { ts, price }
            })
            .collect();

        // Confidence scales with how stretched the price is from its mean:
        // reversion says more when there is something to revert.
        let stretch = ((last_close - anchor).abs() / anchor).min(0.05) / 0.05;
        Ok(BotForecast {
            series,
            confidence: (0.35 + 0.4 * stretch).clamp(0.0, 1.0),
            meta: json!({ "anchor": anchor, "rate": rate, "period": period }),
        })
    }

    fn train(
        &self,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        let period = Self::period(config);
        if candles.len() < period * 3 {
            return Err(format!(
                "reversion training needs {} candles, got {}",
                period * 3,
                candles.len()
            ));
        }
        let all = closes(candles);

        // Walk-forward: score each candidate rate on one-step-ahead error.
        let mut best: Option<(f64, f64)> = None;
        for &rate in RATE_GRID {
            let mut sq_err = 0.0;
            let mut count = 0usize;
            for end in period..all.len() - 1 {
                let anchor = Self::sma(&all[..end], period);
                let forecast = all[end - 1] + rate * (anchor - all[end - 1]);
                sq_err += (forecast - all[end]).powi(2);
                count += 1;
            }
            let mse = sq_err / count.max(1) as f64;
            if best.is_none_or(|(_, best_mse)| mse < best_mse) {
                best = Some((rate, mse));
            }
        }

        let (rate, mse) = best.ok_or_else(|| "no viable rate candidate".to_string())?;
        Ok(TrainOutcome {
            params: json!({ "period": period, "rate": rate }),
            metrics: json!({ "mse": mse, "candidates": RATE_GRID }),
            data_points: all.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar;
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
                timeframe: Timeframe::OneMin,
                start_ts: base + Duration::minutes(i as i64),
                open: Decimal::from_f64(close).unwrap(),
                high: Decimal::from_f64(close + 0.5).unwrap(),
                low: Decimal::from_f64(close - 0.5).unwrap(),
                close: Decimal::from_f64(close).unwrap(),
                volume: Decimal::from(1000),
            })
            .collect()
    }

    #[test]
    fn test_stretched_price_reverts_toward_anchor() {
        // Flat at 1500, then a spike to 1530: forecast should walk back down.
        let mut closes = vec![1500.0; 30];
        closes.push(1530.0);
        let candles = history(&closes);
        let bot = ReversionBot;
        let forecast = bot
            .predict(&candles, &bot.default_params(), 30, Timeframe::OneMin)
            .unwrap();

        assert!(forecast.series[0].price < 1530.0);
        assert!(forecast.series[29].price < forecast.series[0].price);
        // Never crosses below the anchor.
        let anchor = forecast.meta["anchor"].as_f64().unwrap();
        assert!(forecast.series[29].price >= anchor - 1e-9);
    }

    #[test]
    fn test_flat_market_low_confidence() {
        let candles = history(&[1500.0; 40]);
        let bot = ReversionBot;
        let forecast = bot
            .predict(&candles, &bot.default_params(), 10, Timeframe::OneMin)
            .unwrap();
        assert!(forecast.confidence <= 0.4);
        // Nothing to revert: the forecast stays at the last close.
        assert!((forecast.series[9].price - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_train_selects_grid_rate() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 1500.0 + (i as f64 * 0.4).sin() * 8.0)
            .collect();
        let bot = ReversionBot;
        let outcome = bot.train(&history(&closes), &bot.default_params()).unwrap();
        let rate = outcome.params["rate"].as_f64().unwrap();
        assert!(RATE_GRID.iter().any(|&r| (r - rate).abs() < 1e-12));
    }
}
