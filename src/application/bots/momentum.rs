//! Momentum bot: least-squares drift extrapolation.
//!
//! Fits a straight line through the last `lookback` closes and projects the
//! per-minute drift forward, damped so far-out points revert toward flat.

use serde_json::json;

use super::{BotForecast, ForecastBot, TrainOutcome, closes, minute_grid};
use crate::domain::market::prediction::ForecastPoint;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

pub struct MomentumBot;

const DEFAULT_LOOKBACK: usize = 40;
const DEFAULT_DAMPING: f64 = 0.98;
const LOOKBACK_GRID: &[usize] = &[20, 40, 60];

/// Least-squares slope and intercept over `values` indexed 0..n.
fn fit_line(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }
    let slope = if var > 0.0 { cov / var } else { 0.0 };
    (slope, mean_y - slope * mean_x)
}

/// Coefficient of determination for the fitted line; the bot's confidence
/// signal.
fn r_squared(values: &[f64], slope: f64, intercept: f64) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let fitted = intercept + slope * i as f64;
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - mean).powi(2);
    }
    if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl MomentumBot {
    fn lookback(params: &serde_json::Value) -> usize {
        params
            .get("lookback")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|&v| v >= 5)
            .unwrap_or(DEFAULT_LOOKBACK)
    }

    fn damping(params: &serde_json::Value) -> f64 {
        params
            .get("damping")
            .and_then(|v| v.as_f64())
            .filter(|d| d.is_finite() && (0.5..=1.0).contains(d))
            .unwrap_or(DEFAULT_DAMPING)
    }
}

impl ForecastBot for MomentumBot {
    fn name(&self) -> &str {
        "momentum"
    }

    fn min_history(&self) -> usize {
        DEFAULT_LOOKBACK
    }

    fn default_params(&self) -> serde_json::Value {
        json!({ "lookback": DEFAULT_LOOKBACK, "damping": DEFAULT_DAMPING })
    }

    fn predict(
        &self,
        candles: &[Candle],
        params: &serde_json::Value,
        horizon_minutes: u32,
        timeframe: Timeframe,
    ) -> Result<BotForecast, String> {
        if candles.len() < 5 {
            return Err(format!("momentum needs at least 5 candles, got {}", candles.len()));
        }
        let lookback = Self::lookback(params);
        let damping = Self::damping(params);

        let all = closes(candles);
        let window = &all[all.len().saturating_sub(lookback)..];
        let (slope, intercept) = fit_line(window);
        let fit = r_squared(window, slope, intercept);

        // Slope is per candle; spread it over the candle's minutes.
        let per_minute_drift = slope / timeframe.step_minutes() as f64;
        let last_close = *all.last().expect("non-empty history");
        let last_ts = candles[candles.len() - 1].period_close();

        let mut price = last_close;
        let mut drift = per_minute_drift;
        let series: Vec<ForecastPoint> = minute_grid(last_ts, horizon_minutes)
            .map(|ts| {
                price += drift;
                drift *= damping;
                ForecastPoint { ts, price }
            })
            .collect();

        Ok(BotForecast {
            series,
            confidence: (0.3 + 0.6 * fit).clamp(0.0, 1.0),
            meta: json!({ "slope": slope, "r_squared": fit, "lookback": lookback }),
        })
    }

    fn train(
        &self,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        if candles.len() < DEFAULT_LOOKBACK * 2 {
            return Err(format!(
                "momentum training needs {} candles, got {}",
                DEFAULT_LOOKBACK * 2,
                candles.len()
            ));
        }
        let all = closes(candles);
        let damping = Self::damping(config);

        // One-step-ahead walk-forward error per candidate lookback.
        let mut best: Option<(usize, f64)> = None;
        for &lookback in LOOKBACK_GRID {
            if all.len() <= lookback + 1 {
                continue;
            }
            let mut sq_err = 0.0;
            let mut count = 0usize;
            for end in lookback..all.len() - 1 {
                let window = &all[end - lookback..end];
                let (slope, intercept) = fit_line(window);
                let forecast = intercept + slope * lookback as f64;
                sq_err += (forecast - all[end]).powi(2);
                count += 1;
            }
            let mse = sq_err / count.max(1) as f64;
            if best.is_none_or(|(_, best_mse)| mse < best_mse) {
                best = Some((lookback, mse));
            }
        }

        let (lookback, mse) = best.ok_or_else(|| "no viable lookback candidate".to_string())?;
        Ok(TrainOutcome {
            params: json!({ "lookback": lookback, "damping": damping }),
            metrics: json!({ "mse": mse, "candidates": LOOKBACK_GRID }),
            data_points: all.len(),
        })
    }
}
