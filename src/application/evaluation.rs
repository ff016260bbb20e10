//! Scores predictions whose horizon has elapsed against realized candles.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::market::prediction::{Evaluation, MergedPrediction};
use crate::domain::market::types::Candle;
use crate::domain::repositories::{CandleRepository, EvaluationRepository, PredictionRepository};

/// Predictions scored per sweep.
const SWEEP_BATCH: usize = 50;

pub struct PredictionEvaluator {
    predictions: Arc<dyn PredictionRepository>,
    evaluations: Arc<dyn EvaluationRepository>,
    candles: Arc<dyn CandleRepository>,
}

impl PredictionEvaluator {
    pub fn new(
        predictions: Arc<dyn PredictionRepository>,
        evaluations: Arc<dyn EvaluationRepository>,
        candles: Arc<dyn CandleRepository>,
    ) -> Self {
        Self {
            predictions,
            evaluations,
            candles,
        }
    }

    /// One periodic sweep; returns how many predictions were scored.
    pub async fn sweep(&self, now: DateTime<FixedOffset>) -> anyhow::Result<usize> {
        let due = self.predictions.list_unevaluated(now, SWEEP_BATCH).await?;
        let mut scored = 0usize;
        for prediction in due {
            let realized = self
                .candles
                .range(
                    &prediction.symbol,
                    prediction.timeframe,
                    Some(prediction.created_at),
                    Some(prediction.created_at + ChronoDuration::minutes(prediction.horizon_minutes as i64)),
                    0,
                )
                .await?;

            let evaluation = score(&prediction, &realized, now);
            self.evaluations.save(&evaluation).await?;
            scored += 1;
            debug!(
                "Evaluated prediction {}: mae {:.3}, {} points",
                prediction.id, evaluation.mae, evaluation.points_compared
            );
        }
        if scored > 0 {
            info!("Evaluation sweep scored {} predictions", scored);
        }
        Ok(scored)
    }
}

/// Point-wise comparison of the forecast against realized closes. A forecast
/// point matches the candle whose grid period contains its timestamp. With
/// no realized data the evaluation is stored with zero points so the
/// prediction retires from the sweep.
fn score(
    prediction: &MergedPrediction,
    realized: &[Candle],
    now: DateTime<FixedOffset>,
) -> Evaluation {
    let reference = prediction.feature_snapshot.latest_close;
    let mut abs_err_sum = 0.0;
    let mut rel_err_sum = 0.0;
    let mut direction_hits = 0usize;
    let mut compared = 0usize;

    for point in &prediction.predicted_series {
        let Some(candle) = realized
            .iter()
            .find(|c| c.start_ts <= point.ts && point.ts < c.period_close())
        else {
            continue;
        };
        let actual = candle.close.to_f64().unwrap_or(0.0);
        if actual <= 0.0 {
            continue;
        }
        abs_err_sum += (point.price - actual).abs();
        rel_err_sum += (point.price - actual).abs() / actual;
        if (point.price - reference).signum() == (actual - reference).signum() {
            direction_hits += 1;
        }
        compared += 1;
    }

    let denominator = compared.max(1) as f64;
    Evaluation {
        id: 0,
        prediction_id: prediction.id,
        symbol: prediction.symbol.clone(),
        timeframe: prediction.timeframe,
        evaluated_at: now,
        mae: abs_err_sum / denominator,
        mape: rel_err_sum / denominator,
        direction_accuracy: direction_hits as f64 / denominator,
        points_compared: compared,
    }
}
