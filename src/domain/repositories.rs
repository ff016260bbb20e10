//! Repository traits separating the data plane from its SQLite
//! implementations in `infrastructure::persistence`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::domain::market::prediction::{
    Evaluation, MergedPrediction, TrainingRecord, TrainingStatus,
};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

/// Outcome of a batch upsert, mostly for logging and change detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub rewritten: usize,
    pub unchanged: usize,
    pub frozen: usize,
}

impl UpsertStats {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.rewritten > 0
    }
}

/// Persistent append-only candle store keyed by
/// `(symbol, timeframe, start_ts)`.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Inserts new candles. Existing triples with identical values are
    /// no-ops; a live candle (grid period still open at `now`) with changed
    /// values is rewritten; a closed candle is never rewritten.
    async fn upsert_batch(
        &self,
        candles: &[Candle],
        now: DateTime<FixedOffset>,
    ) -> Result<UpsertStats>;

    /// Chronologically ascending slice. Default limit 500, capped at 5000.
    /// With `to` unset, returns the most recent `limit` entries.
    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: Option<DateTime<FixedOffset>>,
        to: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    async fn latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;
}

/// Append-only audit store for merged predictions.
#[async_trait]
pub trait PredictionRepository: Send + Sync {
    /// Persists a prediction and returns its monotonic id.
    async fn save(&self, prediction: &MergedPrediction) -> Result<i64>;

    async fn fetch(&self, id: i64) -> Result<Option<MergedPrediction>>;

    async fn latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<MergedPrediction>>;

    async fn list(
        &self,
        symbol: Option<&str>,
        timeframe: Option<Timeframe>,
        since: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<MergedPrediction>>;

    /// Predictions whose horizon elapsed before `now` and that have no
    /// evaluation row yet.
    async fn list_unevaluated(
        &self,
        now: DateTime<FixedOffset>,
        limit: usize,
    ) -> Result<Vec<MergedPrediction>>;
}

/// Training-job records with the single-non-terminal-per-triple invariant.
#[async_trait]
pub trait TrainingRepository: Send + Sync {
    /// Inserts a `queued` record and returns its id. The caller must have
    /// checked `find_active` first; a racing duplicate is resolved by the
    /// queue's single-writer discipline.
    async fn insert_queued(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
        config: &serde_json::Value,
        queued_at: DateTime<FixedOffset>,
    ) -> Result<i64>;

    /// The non-terminal (queued or running) record for a triple, if any.
    async fn find_active(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<Option<TrainingRecord>>;

    async fn mark_running(&self, id: i64, started_at: DateTime<FixedOffset>) -> Result<()>;

    async fn mark_finished(
        &self,
        id: i64,
        status: TrainingStatus,
        ended_at: DateTime<FixedOffset>,
        data_points: i64,
        metrics: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()>;

    async fn fetch(&self, id: i64) -> Result<Option<TrainingRecord>>;

    /// All non-terminal records, oldest first (the visible queue).
    async fn list_open(&self) -> Result<Vec<TrainingRecord>>;
}

/// Accuracy records for predictions whose horizon has elapsed.
#[async_trait]
pub trait EvaluationRepository: Send + Sync {
    async fn save(&self, evaluation: &Evaluation) -> Result<i64>;

    async fn list_for_prediction(&self, prediction_id: i64) -> Result<Vec<Evaluation>>;
}
