//! Baseline bot: anchored flat forecast.
//!
//! Projects the last close unchanged across the horizon. Useless on its own
//! but a stabilizing member of the ensemble and the benchmark other bots
//! must beat in evaluation.

use rust_decimal::prelude::ToPrimitive;
use serde_json::json;

use super::{BotForecast, ForecastBot, TrainOutcome, minute_grid};
use crate::domain::market::prediction::ForecastPoint;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

pub struct BaselineBot;

impl ForecastBot for BaselineBot {
    fn name(&self) -> &str {
        "baseline"
    }

    fn min_history(&self) -> usize {
        1
    }

    fn default_params(&self) -> serde_json::Value {
        json!({})
    }

    fn predict(
        &self,
        candles: &[Candle],
        _params: &serde_json::Value,
        horizon_minutes: u32,
        _timeframe: Timeframe,
    ) -> Result<BotForecast, String> {
        let last = candles.last().ok_or("baseline needs at least one candle")?;
        let price = last.close.to_f64().filter(|p| *p > 0.0).ok_or("non-positive close")?;

        let series: Vec<ForecastPoint> = minute_grid(last.period_close(), horizon_minutes)
            .map(|ts| ForecastPoint { ts, price })
            .collect();

        Ok(BotForecast {
            series,
            confidence: 0.5,
            meta: json!({ "anchor": price }),
        })
    }

    fn train(
        &self,
        candles: &[Candle],
        _config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        // Nothing to fit; training just records the data size.
        Ok(TrainOutcome {
            params: json!({}),
            metrics: json!({ "note": "baseline has no tunable parameters" }),
            data_points: candles.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_flat_forecast_at_last_close() {
        let candle = Candle {
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
        };
        let bot = BaselineBot;
        let forecast = bot
            .predict(&[candle.clone()], &bot.default_params(), 15, Timeframe::FiveMin)
            .unwrap();

        assert_eq!(forecast.series.len(), 15);
        assert!(forecast.series.iter().all(|p| (p.price - 1505.0).abs() < 1e-9));
        // First point lands one minute after the candle period closes.
        assert_eq!(
            forecast.series[0].ts,
            candle.period_close() + Duration::minutes(1)
        );
    }

    #[test]
    fn test_empty_history_rejected() {
        let bot = BaselineBot;
        assert!(
            bot.predict(&[], &bot.default_params(), 15, Timeframe::FiveMin)
                .is_err()
        );
    }
}
