//! Prediction Merger: fan out to the selected bots, validate and sanitize
//! each forecast, merge the survivors into one confidence-weighted series,
//! and persist the full audit payload.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::bots::{BotAdapter, BotForecast, BotRegistry};
use crate::application::features;
use crate::domain::calendar;
use crate::domain::errors::MergeError;
use crate::domain::market::prediction::{
    BotContribution, BotRawOutput, ForecastPoint, MergedPrediction, SanitizationSummary,
    ValidationFlag, ValidationStatus,
};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::{CandleRepository, PredictionRepository};
use crate::domain::validation::forecast_quality::{hard_validate, magnitude_ok, sanitize};
use crate::infrastructure::observability::metrics::Metrics;

/// Confidence penalty applied to a bot whose series needed clipping.
const SANITIZED_CONFIDENCE_SCALE: f64 = 0.8;

pub struct PredictionMerger {
    candles: Arc<dyn CandleRepository>,
    audit: Arc<dyn PredictionRepository>,
    registry: Arc<BotRegistry>,
    metrics: Metrics,
    bot_timeout: Duration,
    merger_timeout: Duration,
}

/// One bot's outcome after validation, before merging.
struct BotOutcome {
    name: String,
    raw: BotRawOutput,
    flag: ValidationFlag,
    /// Present only for retained (valid or sanitized) bots.
    retained: Option<RetainedForecast>,
}

struct RetainedForecast {
    series: Vec<ForecastPoint>,
    confidence: f64,
    clipped_points: usize,
    meta: serde_json::Value,
}

impl PredictionMerger {
    pub fn new(
        candles: Arc<dyn CandleRepository>,
        audit: Arc<dyn PredictionRepository>,
        registry: Arc<BotRegistry>,
        metrics: Metrics,
        bot_timeout: Duration,
        merger_timeout: Duration,
    ) -> Self {
        Self {
            candles,
            audit,
            registry,
            metrics,
            bot_timeout,
            merger_timeout,
        }
    }

    /// Produces, audits and returns one merged prediction.
    pub async fn merge(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        horizon_minutes: u32,
        selected_bots: Option<&[String]>,
    ) -> Result<MergedPrediction, MergeError> {
        let deadline = self.merger_timeout;
        match tokio::time::timeout(
            deadline,
            self.merge_inner(symbol, timeframe, horizon_minutes, selected_bots),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.metrics
                    .predictions_total
                    .with_label_values(&["failed"])
                    .inc();
                Err(MergeError::DeadlineExceeded {
                    symbol: symbol.to_string(),
                    timeout_secs: deadline.as_secs(),
                })
            }
        }
    }

    async fn merge_inner(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        horizon_minutes: u32,
        selected_bots: Option<&[String]>,
    ) -> Result<MergedPrediction, MergeError> {
        let adapters = self
            .registry
            .select(selected_bots)
            .map_err(|e| MergeError::Other(anyhow::anyhow!(e)))?;
        let selected_count = adapters.len();
        if selected_count == 0 {
            return Err(MergeError::AllBotsRejected {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        let history_limit = self.registry.max_history(&adapters);
        let candles = self
            .candles
            .range(symbol, timeframe, None, None, history_limit)
            .await?;
        if candles.is_empty() {
            return Err(MergeError::NoHistory {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        let snapshot = features::compute_snapshot(&candles)
            .ok_or_else(|| MergeError::Other(anyhow::anyhow!("feature snapshot unavailable")))?;
        let reference_close = snapshot.latest_close;

        let outcomes = self
            .fan_out(&adapters, symbol, timeframe, &candles, horizon_minutes, reference_close)
            .await;

        let retained: Vec<&BotOutcome> =
            outcomes.iter().filter(|o| o.retained.is_some()).collect();
        if retained.is_empty() {
            self.metrics
                .predictions_total
                .with_label_values(&["failed"])
                .inc();
            warn!("Merger: all {} bots rejected for {} {}", selected_count, symbol, timeframe);
            return Err(MergeError::AllBotsRejected {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        let created_at = calendar::now_ist();
        let (mut merged_series, contributions, overall_confidence, mut summary) = reduce(
            &retained,
            created_at,
            horizon_minutes,
            selected_count,
        );

        // Post-merge sanity: the weighted mean of in-bound series is normally
        // in bounds, but interpolation at the seams can still poke out.
        let mut final_status = if summary.bots_sanitized > 0 {
            "sanitized"
        } else {
            "valid"
        };
        if !magnitude_ok(&merged_series, reference_close) {
            let (reclipped, clipped) = sanitize(&merged_series, reference_close);
            merged_series = reclipped;
            summary.merged_reclipped = true;
            summary.total_clipped_points += clipped;
            final_status = "sanitized";
        }

        // Defensive ordering pass: exact-duplicate timestamps collapse to the
        // first occurrence.
        merged_series.dedup_by(|a, b| a.ts == b.ts);

        let prediction = MergedPrediction {
            id: 0,
            symbol: symbol.to_string(),
            timeframe,
            created_at,
            horizon_minutes,
            predicted_series: merged_series,
            overall_confidence,
            bot_contributions: contributions,
            bot_raw_outputs: outcomes.iter().map(|o| o.raw.clone()).collect(),
            validation_flags: outcomes.iter().map(|o| o.flag.clone()).collect(),
            feature_snapshot: snapshot,
            sanitization_summary: summary,
        };

        let id = self.audit.save(&prediction).await?;
        self.metrics
            .predictions_total
            .with_label_values(&[final_status])
            .inc();
        info!(
            "Merger: prediction {} for {} {} ({} of {} bots retained, confidence {:.3})",
            id,
            symbol,
            timeframe,
            retained.len(),
            selected_count,
            overall_confidence
        );

        Ok(MergedPrediction { id, ..prediction })
    }

    /// One task per bot on the blocking pool, each under the per-bot budget.
    async fn fan_out(
        &self,
        adapters: &[Arc<BotAdapter>],
        symbol: &str,
        timeframe: Timeframe,
        candles: &[crate::domain::market::types::Candle],
        horizon_minutes: u32,
        reference_close: f64,
    ) -> Vec<BotOutcome> {
        let tasks = adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let symbol = symbol.to_string();
            let candles = candles.to_vec();
            let bot_timeout = self.bot_timeout;
            async move {
                let name = adapter.name().to_string();
                let result = tokio::time::timeout(
                    bot_timeout,
                    tokio::task::spawn_blocking(move || {
                        adapter.predict(&symbol, timeframe, &candles, horizon_minutes)
                    }),
                )
                .await;
                let outcome: Result<BotForecast, String> = match result {
                    Ok(Ok(bot_result)) => bot_result,
                    Ok(Err(join_error)) => Err(format!("bot task panicked: {}", join_error)),
                    Err(_) => Err(format!("bot timed out after {:?}", bot_timeout)),
                };
                (name, outcome)
            }
        });

        join_all(tasks)
            .await
            .into_iter()
            .map(|(name, outcome)| self.judge(name, outcome, horizon_minutes, reference_close))
            .collect()
    }

    /// Applies hard then magnitude validation to one bot result.
    fn judge(
        &self,
        name: String,
        outcome: Result<BotForecast, String>,
        horizon_minutes: u32,
        reference_close: f64,
    ) -> BotOutcome {
        let (status, raw, retained, detail) = match outcome {
            Err(error) => {
                warn!("Merger: bot {} errored: {}", name, error);
                (
                    ValidationStatus::Exception,
                    BotRawOutput {
                        bot_name: name.clone(),
                        series: Vec::new(),
                        confidence: 0.0,
                        error: Some(error.clone()),
                    },
                    None,
                    Some(error),
                )
            }
            Ok(forecast) => {
                let raw = BotRawOutput {
                    bot_name: name.clone(),
                    series: forecast.series.clone(),
                    confidence: forecast.confidence,
                    error: None,
                };
                if forecast.series.is_empty() {
                    (ValidationStatus::Empty, raw, None, None)
                } else if let Err(fault) = hard_validate(&forecast.series, horizon_minutes) {
                    warn!("Merger: bot {} rejected: {}", name, fault);
                    (ValidationStatus::Rejected, raw, None, Some(fault.to_string()))
                } else if magnitude_ok(&forecast.series, reference_close) {
                    let retained = RetainedForecast {
                        series: forecast.series,
                        confidence: forecast.confidence,
                        clipped_points: 0,
                        meta: forecast.meta,
                    };
                    (ValidationStatus::Valid, raw, Some(retained), None)
                } else {
                    let (series, clipped) = sanitize(&forecast.series, reference_close);
                    let retained = RetainedForecast {
                        series,
                        confidence: forecast.confidence * SANITIZED_CONFIDENCE_SCALE,
                        clipped_points: clipped,
                        meta: forecast.meta,
                    };
                    (
                        ValidationStatus::Sanitized,
                        raw,
                        Some(retained),
                        Some(format!("{} points clipped", clipped)),
                    )
                }
            }
        };

        let status_label = status.to_string();
        self.metrics
            .bot_forecasts_total
            .with_label_values(&[name.as_str(), status_label.as_str()])
            .inc();

        BotOutcome {
            name: name.clone(),
            raw,
            flag: ValidationFlag {
                bot_name: name,
                status,
                detail,
            },
            retained,
        }
    }
}

/// Aligns the retained series on the 1-minute grid and reduces them to the
/// confidence-weighted mean.
fn reduce(
    retained: &[&BotOutcome],
    created_at: DateTime<FixedOffset>,
    horizon_minutes: u32,
    selected_count: usize,
) -> (Vec<ForecastPoint>, Vec<BotContribution>, f64, SanitizationSummary) {
    let forecasts: Vec<&RetainedForecast> = retained
        .iter()
        .map(|o| o.retained.as_ref().expect("retained outcome has forecast"))
        .collect();

    let confidence_sum: f64 = forecasts.iter().map(|f| f.confidence).sum();
    let weights: Vec<f64> = if confidence_sum > 0.0 {
        forecasts.iter().map(|f| f.confidence / confidence_sum).collect()
    } else {
        vec![1.0 / forecasts.len() as f64; forecasts.len()]
    };

    // Grid spans (created_at, created_at + horizon], one point per minute,
    // seconds zeroed so timestamps are exact minute marks.
    let grid_base = created_at
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(created_at);
    let mut merged = Vec::with_capacity(horizon_minutes as usize);
    for minute in 1..=horizon_minutes as i64 {
        let ts = grid_base + ChronoDuration::minutes(minute);
        let price = forecasts
            .iter()
            .zip(&weights)
            .map(|(forecast, weight)| weight * interpolate(&forecast.series, ts))
            .sum();
        merged.push(ForecastPoint { ts, price });
    }

    let contributions: Vec<BotContribution> = retained
        .iter()
        .zip(&weights)
        .map(|(outcome, &weight)| {
            let forecast = outcome.retained.as_ref().expect("retained");
            BotContribution {
                bot_name: outcome.name.clone(),
                weight,
                confidence: forecast.confidence,
                validation_status: outcome.flag.status,
                clipped_points: forecast.clipped_points,
                meta: forecast.meta.clone(),
            }
        })
        .collect();

    let bots_sanitized = contributions
        .iter()
        .filter(|c| c.validation_status == ValidationStatus::Sanitized)
        .count();
    let total_clipped_points = contributions.iter().map(|c| c.clipped_points).sum();

    let mut overall: f64 = forecasts
        .iter()
        .zip(&weights)
        .map(|(forecast, weight)| forecast.confidence * weight)
        .sum();
    overall *= retained.len() as f64 / selected_count as f64;
    if bots_sanitized > 0 {
        overall *= SANITIZED_CONFIDENCE_SCALE;
    }

    (
        merged,
        contributions,
        overall.clamp(0.0, 1.0),
        SanitizationSummary {
            bots_sanitized,
            total_clipped_points,
            merged_reclipped: false,
        },
    )
}

/// Linear interpolation of a bot's series at `ts`; flat extrapolation at the
/// edges.
fn interpolate(series: &[ForecastPoint], ts: DateTime<FixedOffset>) -> f64 {
    debug_assert!(!series.is_empty());
    if ts <= series[0].ts {
        return series[0].price;
    }
    if let Some(last) = series.last()
        && ts >= last.ts
    {
        return last.price;
    }
    match series.binary_search_by_key(&ts, |p| p.ts) {
        Ok(index) => series[index].price,
        Err(index) => {
            let before = &series[index - 1];
            let after = &series[index];
            let span = (after.ts - before.ts).num_seconds() as f64;
            let offset = (ts - before.ts).num_seconds() as f64;
            before.price + (after.price - before.price) * (offset / span)
        }
    }
}
