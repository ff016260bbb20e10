pub mod evaluation_repository;
pub mod prediction_repository;
pub mod training_repository;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

use crate::domain::market::timeframe::{Timeframe, ist_datetime};
use crate::domain::market::types::Candle;
use crate::domain::repositories::{CandleRepository, UpsertStats};

pub const DEFAULT_RANGE_LIMIT: usize = 500;
pub const MAX_RANGE_LIMIT: usize = 5_000;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
        let timeframe: String = row.try_get("timeframe")?;
        let start_ts: i64 = row.try_get("start_ts")?;
        Ok(Candle {
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            start_ts: ist_datetime(start_ts),
            open: Decimal::from_str(row.try_get("open")?).unwrap_or_default(),
            high: Decimal::from_str(row.try_get("high")?).unwrap_or_default(),
            low: Decimal::from_str(row.try_get("low")?).unwrap_or_default(),
            close: Decimal::from_str(row.try_get("close")?).unwrap_or_default(),
            volume: Decimal::from_str(row.try_get("volume")?).unwrap_or_default(),
        })
    }

    pub fn clamp_limit(limit: usize) -> usize {
        if limit == 0 {
            DEFAULT_RANGE_LIMIT
        } else {
            limit.min(MAX_RANGE_LIMIT)
        }
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert_batch(
        &self,
        candles: &[Candle],
        now: DateTime<FixedOffset>,
    ) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut tx = self.pool.begin().await.context("Failed to begin upsert")?;

        for candle in candles {
            let inserted = sqlx::query(
                r#"
                INSERT INTO candles (symbol, timeframe, start_ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timeframe, start_ts) DO NOTHING
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.start_ts.timestamp())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert candle")?
            .rows_affected();

            if inserted == 1 {
                stats.inserted += 1;
                continue;
            }

            // Row-by-row reconciliation on conflict.
            let existing_row = sqlx::query(
                "SELECT * FROM candles WHERE symbol = ? AND timeframe = ? AND start_ts = ?",
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.start_ts.timestamp())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read conflicting candle")?;
            let existing = Self::map_row(&existing_row)?;

            if existing.same_values(candle) {
                stats.unchanged += 1;
                continue;
            }

            if candle.period_close() <= now {
                // The grid period has closed; the stored candle is immutable.
                debug!(
                    "Refusing rewrite of closed candle {} {} @ {}",
                    candle.symbol, candle.timeframe, candle.start_ts
                );
                stats.frozen += 1;
                continue;
            }

            sqlx::query(
                r#"
                UPDATE candles SET open = ?, high = ?, low = ?, close = ?, volume = ?
                WHERE symbol = ? AND timeframe = ? AND start_ts = ?
                "#,
            )
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.start_ts.timestamp())
            .execute(&mut *tx)
            .await
            .context("Failed to rewrite live candle")?;
            stats.rewritten += 1;
        }

        tx.commit().await.context("Failed to commit upsert")?;
        Ok(stats)
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: Option<DateTime<FixedOffset>>,
        to: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = Self::clamp_limit(limit) as i64;
        let from_ts = from.map(|t| t.timestamp());

        let rows = match to {
            Some(to) => {
                sqlx::query(
                    r#"
                    SELECT * FROM candles
                    WHERE symbol = ? AND timeframe = ?
                      AND start_ts >= ? AND start_ts <= ?
                    ORDER BY start_ts ASC LIMIT ?
                    "#,
                )
                .bind(symbol)
                .bind(timeframe.to_string())
                .bind(from_ts.unwrap_or(i64::MIN))
                .bind(to.timestamp())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                // No upper bound: the most recent `limit` entries, returned
                // ascending.
                let mut rows = sqlx::query(
                    r#"
                    SELECT * FROM candles
                    WHERE symbol = ? AND timeframe = ? AND start_ts >= ?
                    ORDER BY start_ts DESC LIMIT ?
                    "#,
                )
                .bind(symbol)
                .bind(timeframe.to_string())
                .bind(from_ts.unwrap_or(i64::MIN))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
                rows.reverse();
                rows
            }
        };

        rows.iter().map(Self::map_row).collect()
    }

    async fn latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM candles WHERE symbol = ? AND timeframe = ?
            ORDER BY start_ts DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }
}
