//! Forecast bots: named producers behind a single capability.
//!
//! Bot internals are opaque to the rest of the system; everything outside
//! this module sees only the registry and the adapters. Bot compute is
//! CPU-bound and synchronous; callers run it on the blocking worker pool.

pub mod adapter;
pub mod baseline;
pub mod momentum;
pub mod registry;
pub mod reversion;

pub use adapter::BotAdapter;
pub use registry::BotRegistry;

use crate::domain::market::prediction::ForecastPoint;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

/// Width of the current feature pipeline. An artifact declaring another
/// input shape cannot be fed and is rebuilt fresh by the adapter.
pub const FEATURE_DIM: usize = 4;

/// What a bot hands back from one prediction call.
#[derive(Debug, Clone)]
pub struct BotForecast {
    pub series: Vec<ForecastPoint>,
    pub confidence: f64,
    pub meta: serde_json::Value,
}

/// What a bot hands back from one training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub params: serde_json::Value,
    pub metrics: serde_json::Value,
    pub data_points: usize,
}

/// A named forecast producer.
///
/// `predict` receives the candle history (ascending), the tuned parameters
/// from the bot's artifact, and the horizon; it returns one point per minute
/// starting one minute after the last candle close. `train` fits parameters
/// to the history and reports fit metrics.
pub trait ForecastBot: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum history length required for a meaningful prediction.
    fn min_history(&self) -> usize;

    /// Parameters used before any training has run.
    fn default_params(&self) -> serde_json::Value;

    fn predict(
        &self,
        candles: &[Candle],
        params: &serde_json::Value,
        horizon_minutes: u32,
        timeframe: Timeframe,
    ) -> Result<BotForecast, String>;

    fn train(
        &self,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<TrainOutcome, String>;
}

/// Shared helper: closes as `f64` for the fitting code.
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    use rust_decimal::prelude::ToPrimitive;
    candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect()
}

/// Shared helper: the per-minute forecast grid starting after `last`.
pub(crate) fn minute_grid(
    last: chrono::DateTime<chrono::FixedOffset>,
    horizon_minutes: u32,
) -> impl Iterator<Item = chrono::DateTime<chrono::FixedOffset>> {
    (1..=horizon_minutes as i64).map(move |i| last + chrono::Duration::minutes(i))
}
