//! Audit store: append-only persistence of merged predictions.
//!
//! Structured sub-documents (series, contributions, raw outputs, flags,
//! snapshot, sanitization summary) are stored as opaque JSON columns so the
//! full payload — including rejected bots' raw outputs — survives for
//! post-hoc analysis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::market::prediction::MergedPrediction;
use crate::domain::market::timeframe::{Timeframe, ist_datetime};
use crate::domain::repositories::PredictionRepository;

pub struct SqlitePredictionRepository {
    pool: SqlitePool,
}

impl SqlitePredictionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<MergedPrediction> {
        let timeframe: String = row.try_get("timeframe")?;
        let created_at: i64 = row.try_get("created_at")?;
        let series: String = row.try_get("predicted_series")?;
        let contributions: String = row.try_get("bot_contributions")?;
        let raw_outputs: String = row.try_get("bot_raw_outputs")?;
        let flags: String = row.try_get("validation_flags")?;
        let snapshot: String = row.try_get("feature_snapshot")?;
        let sanitization: String = row.try_get("sanitization_summary")?;

        Ok(MergedPrediction {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            created_at: ist_datetime(created_at),
            horizon_minutes: row.try_get::<i64, _>("horizon_minutes")? as u32,
            overall_confidence: row.try_get("overall_confidence")?,
            predicted_series: serde_json::from_str(&series)
                .context("Corrupt predicted_series column")?,
            bot_contributions: serde_json::from_str(&contributions)
                .context("Corrupt bot_contributions column")?,
            bot_raw_outputs: serde_json::from_str(&raw_outputs)
                .context("Corrupt bot_raw_outputs column")?,
            validation_flags: serde_json::from_str(&flags)
                .context("Corrupt validation_flags column")?,
            feature_snapshot: serde_json::from_str(&snapshot)
                .context("Corrupt feature_snapshot column")?,
            sanitization_summary: serde_json::from_str(&sanitization)
                .context("Corrupt sanitization_summary column")?,
        })
    }
}

#[async_trait]
impl PredictionRepository for SqlitePredictionRepository {
    async fn save(&self, prediction: &MergedPrediction) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                symbol, timeframe, created_at, horizon_minutes, overall_confidence,
                predicted_series, bot_contributions, bot_raw_outputs,
                validation_flags, feature_snapshot, sanitization_summary
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prediction.symbol)
        .bind(prediction.timeframe.to_string())
        .bind(prediction.created_at.timestamp())
        .bind(prediction.horizon_minutes as i64)
        .bind(prediction.overall_confidence)
        .bind(serde_json::to_string(&prediction.predicted_series)?)
        .bind(serde_json::to_string(&prediction.bot_contributions)?)
        .bind(serde_json::to_string(&prediction.bot_raw_outputs)?)
        .bind(serde_json::to_string(&prediction.validation_flags)?)
        .bind(serde_json::to_string(&prediction.feature_snapshot)?)
        .bind(serde_json::to_string(&prediction.sanitization_summary)?)
        .execute(&self.pool)
        .await
        .context("Failed to save prediction")?;

        Ok(result.last_insert_rowid())
    }

    async fn fetch(&self, id: i64) -> Result<Option<MergedPrediction>> {
        let row = sqlx::query("SELECT * FROM predictions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<MergedPrediction>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM predictions WHERE symbol = ? AND timeframe = ?
            ORDER BY created_at DESC, id DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(
        &self,
        symbol: Option<&str>,
        timeframe: Option<Timeframe>,
        since: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<MergedPrediction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE (? IS NULL OR symbol = ?)
              AND (? IS NULL OR timeframe = ?)
              AND created_at >= ?
            ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(symbol)
        .bind(timeframe.map(|t| t.to_string()))
        .bind(timeframe.map(|t| t.to_string()))
        .bind(since.map(|t| t.timestamp()).unwrap_or(i64::MIN))
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_unevaluated(
        &self,
        now: DateTime<FixedOffset>,
        limit: usize,
    ) -> Result<Vec<MergedPrediction>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM predictions p
            LEFT JOIN evaluations e ON e.prediction_id = p.id
            WHERE e.id IS NULL
              AND p.created_at + p.horizon_minutes * 60 <= ?
            ORDER BY p.created_at ASC LIMIT ?
            "#,
        )
        .bind(now.timestamp())
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }
}
