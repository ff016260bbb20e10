//! Merger end-to-end: runaway forecasts are clamped, weights normalize, and
//! an empty ensemble fails without persisting anything.

use chrono::{Duration as ChronoDuration, TimeZone};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::time::Duration;

use tickcast::application::bots::{
    BotAdapter, BotForecast, BotRegistry, ForecastBot, TrainOutcome,
};
use tickcast::application::merger::PredictionMerger;
use tickcast::domain::calendar;
use tickcast::domain::errors::MergeError;
use tickcast::domain::market::prediction::{ForecastPoint, ValidationStatus};
use tickcast::domain::market::timeframe::Timeframe;
use tickcast::domain::market::types::Candle;
use tickcast::domain::repositories::{CandleRepository, PredictionRepository};
use tickcast::infrastructure::observability::metrics::Metrics;
use tickcast::infrastructure::persistence::database::{Database, PoolSettings};
use tickcast::infrastructure::persistence::{SqliteCandleRepository, SqlitePredictionRepository};

/// A bot that always forecasts the runaway series from the clamping
/// scenario: +0.7%, +6.7%, +100% against a 1500 reference.
struct RunawayBot;

impl ForecastBot for RunawayBot {
    fn name(&self) -> &str {
        "runaway"
    }

    fn min_history(&self) -> usize {
        1
    }

    fn default_params(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn predict(
        &self,
        _candles: &[Candle],
        _params: &serde_json::Value,
        horizon_minutes: u32,
        _timeframe: Timeframe,
    ) -> Result<BotForecast, String> {
        let now = calendar::now_ist();
        let prices = [1510.0, 1600.0, 3000.0];
        let series = (1..=horizon_minutes as i64)
            .map(|minute| ForecastPoint {
                ts: now + ChronoDuration::minutes(minute),
                price: prices[(minute - 1).min(2) as usize],
            })
            .collect();
        Ok(BotForecast {
            series,
            confidence: 0.9,
            meta: serde_json::json!({}),
        })
    }

    fn train(
        &self,
        _candles: &[Candle],
        _config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        Err("runaway bot does not train".to_string())
    }
}

/// A bot that always errors, to exercise the all-rejected path.
struct BrokenBot;

impl ForecastBot for BrokenBot {
    fn name(&self) -> &str {
        "broken"
    }

    fn min_history(&self) -> usize {
        1
    }

    fn default_params(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn predict(
        &self,
        _candles: &[Candle],
        _params: &serde_json::Value,
        _horizon_minutes: u32,
        _timeframe: Timeframe,
    ) -> Result<BotForecast, String> {
        Err("model exploded".to_string())
    }

    fn train(
        &self,
        _candles: &[Candle],
        _config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        Err("no".to_string())
    }
}

struct Harness {
    merger: PredictionMerger,
    predictions: Arc<dyn PredictionRepository>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

async fn harness(bots: Vec<Arc<dyn ForecastBot>>) -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let artifact_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/test.db", db_dir.path().display());
    let db = Database::new(&url, PoolSettings::default()).await.unwrap();

    let candles: Arc<dyn CandleRepository> =
        Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let predictions: Arc<dyn PredictionRepository> =
        Arc::new(SqlitePredictionRepository::new(db.pool.clone()));

    // Forty 5m candles on a trading day, last close exactly 1500.
    let base = calendar::ist()
        .with_ymd_and_hms(2025, 7, 9, 9, 15, 0)
        .unwrap();
    let history: Vec<Candle> = (0..40)
        .map(|i| {
            let close = if i == 39 { 1500.0 } else { 1498.0 + (i % 3) as f64 };
            Candle {
                symbol: "INFY.NS".to_string(),
                timeframe: Timeframe::FiveMin,
                start_ts: base + ChronoDuration::minutes(5 * i),
                open: Decimal::from_f64(close - 1.0).unwrap(),
                high: Decimal::from_f64(close + 2.0).unwrap(),
                low: Decimal::from_f64(close - 2.0).unwrap(),
                close: Decimal::from_f64(close).unwrap(),
                volume: Decimal::from(10_000),
            }
        })
        .collect();
    let after = calendar::ist()
        .with_ymd_and_hms(2025, 7, 9, 16, 0, 0)
        .unwrap();
    candles.upsert_batch(&history, after).await.unwrap();

    let mut registry = BotRegistry::empty();
    for bot in bots {
        registry.register(Arc::new(BotAdapter::new(bot, artifact_dir.path())));
    }

    let merger = PredictionMerger::new(
        Arc::clone(&candles),
        Arc::clone(&predictions),
        Arc::new(registry),
        Metrics::new().unwrap(),
        Duration::from_secs(8),
        Duration::from_secs(30),
    );

    Harness {
        merger,
        predictions,
        _dirs: (db_dir, artifact_dir),
    }
}

#[tokio::test]
async fn runaway_forecast_is_clamped_and_flagged() {
    let h = harness(vec![Arc::new(RunawayBot)]).await;

    let prediction = h
        .merger
        .merge("INFY.NS", Timeframe::FiveMin, 3, None)
        .await
        .unwrap();

    // Every merged point obeys the absolute band around the 1500 reference.
    let ceiling = 1500.0 * 1.15;
    assert!(
        prediction
            .predicted_series
            .iter()
            .all(|p| p.price <= ceiling + 1e-9),
        "series: {:?}",
        prediction.predicted_series
    );

    let flag = prediction
        .validation_flags
        .iter()
        .find(|f| f.bot_name == "runaway")
        .unwrap();
    assert_eq!(flag.status, ValidationStatus::Sanitized);

    // The bot's confidence was scaled by 0.8 on sanitization.
    let contribution = &prediction.bot_contributions[0];
    assert!((contribution.confidence - 0.9 * 0.8).abs() < 1e-9);
    assert!(contribution.clipped_points > 0);
    assert!(prediction.sanitization_summary.bots_sanitized >= 1);

    // The raw output is captured verbatim, un-clamped.
    let raw = &prediction.bot_raw_outputs[0];
    assert!(raw.series.iter().any(|p| p.price == 3000.0));

    // Persisted with a monotonic id.
    assert!(prediction.id > 0);
    let stored = h.predictions.fetch(prediction.id).await.unwrap().unwrap();
    assert_eq!(stored.predicted_series.len(), prediction.predicted_series.len());
}

#[tokio::test]
async fn retained_weights_sum_to_one() {
    let h = harness(vec![
        Arc::new(tickcast::application::bots::baseline::BaselineBot),
        Arc::new(RunawayBot),
    ])
    .await;

    let prediction = h
        .merger
        .merge("INFY.NS", Timeframe::FiveMin, 3, None)
        .await
        .unwrap();

    let weight_sum: f64 = prediction.bot_contributions.iter().map(|c| c.weight).sum();
    assert!((weight_sum - 1.0).abs() < 1e-6);

    // Strictly ascending series on the minute grid.
    for pair in prediction.predicted_series.windows(2) {
        assert!(pair[0].ts < pair[1].ts);
    }
}

#[tokio::test]
async fn all_bots_rejected_is_not_persisted() {
    let h = harness(vec![Arc::new(BrokenBot)]).await;

    let err = h
        .merger
        .merge("INFY.NS", Timeframe::FiveMin, 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::AllBotsRejected { .. }));

    // Nothing reached the audit store.
    assert!(
        h.predictions
            .latest("INFY.NS", Timeframe::FiveMin)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn unknown_symbol_has_no_history() {
    let h = harness(vec![Arc::new(RunawayBot)]).await;
    let err = h
        .merger
        .merge("TCS.NS", Timeframe::FiveMin, 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::NoHistory { .. }));
}
