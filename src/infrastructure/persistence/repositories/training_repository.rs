use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::market::prediction::{TrainingRecord, TrainingStatus};
use crate::domain::market::timeframe::{Timeframe, ist_datetime};
use crate::domain::repositories::TrainingRepository;

pub struct SqliteTrainingRepository {
    pool: SqlitePool,
}

impl SqliteTrainingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<TrainingRecord> {
        let timeframe: String = row.try_get("timeframe")?;
        let status: String = row.try_get("status")?;
        let metrics: String = row.try_get("metrics")?;
        let config: String = row.try_get("config")?;
        Ok(TrainingRecord {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            bot_name: row.try_get("bot_name")?,
            status: TrainingStatus::from_str(&status)?,
            queued_at: ist_datetime(row.try_get("queued_at")?),
            started_at: row
                .try_get::<Option<i64>, _>("started_at")?
                .map(ist_datetime),
            ended_at: row.try_get::<Option<i64>, _>("ended_at")?.map(ist_datetime),
            data_points: row.try_get("data_points")?,
            metrics: serde_json::from_str(&metrics).unwrap_or(serde_json::Value::Null),
            config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl TrainingRepository for SqliteTrainingRepository {
    async fn insert_queued(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
        config: &serde_json::Value,
        queued_at: DateTime<FixedOffset>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO training_records (symbol, timeframe, bot_name, status, queued_at, config)
            VALUES (?, ?, ?, 'queued', ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(bot_name)
        .bind(queued_at.timestamp())
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await
        .context("Failed to insert training record")?;

        Ok(result.last_insert_rowid())
    }

    async fn find_active(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<Option<TrainingRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM training_records
            WHERE symbol = ? AND timeframe = ? AND bot_name = ?
              AND status IN ('queued', 'running')
            ORDER BY id ASC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(bot_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn mark_running(&self, id: i64, started_at: DateTime<FixedOffset>) -> Result<()> {
        sqlx::query("UPDATE training_records SET status = 'running', started_at = ? WHERE id = ?")
            .bind(started_at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark training running")?;
        Ok(())
    }

    async fn mark_finished(
        &self,
        id: i64,
        status: TrainingStatus,
        ended_at: DateTime<FixedOffset>,
        data_points: i64,
        metrics: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        sqlx::query(
            r#"
            UPDATE training_records
            SET status = ?, ended_at = ?, data_points = ?, metrics = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(ended_at.timestamp())
        .bind(data_points)
        .bind(serde_json::to_string(metrics)?)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark training finished")?;
        Ok(())
    }

    async fn fetch(&self, id: i64) -> Result<Option<TrainingRecord>> {
        let row = sqlx::query("SELECT * FROM training_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_open(&self) -> Result<Vec<TrainingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM training_records
            WHERE status IN ('queued', 'running')
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar;
    use crate::infrastructure::persistence::database::{Database, PoolSettings};

    async fn repo() -> (SqliteTrainingRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db", dir.path().display());
        let db = Database::new(&url, PoolSettings::default()).await.unwrap();
        (SqliteTrainingRepository::new(db.pool), dir)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (repo, _dir) = repo().await;
        let now = calendar::now_ist();
        let id = repo
            .insert_queued("INFY.NS", Timeframe::FifteenMin, "lstm_bot", &serde_json::json!({}), now)
            .await
            .unwrap();

        let record = repo.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Queued);

        repo.mark_running(id, now).await.unwrap();
        let record = repo.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Running);
        assert!(record.started_at.is_some());

        repo.mark_finished(
            id,
            TrainingStatus::Completed,
            now,
            1200,
            &serde_json::json!({"mae": 3.1}),
            None,
        )
        .await
        .unwrap();
        let record = repo.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Completed);
        assert_eq!(record.data_points, 1200);
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_find_active_sees_queued_and_running_only() {
        let (repo, _dir) = repo().await;
        let now = calendar::now_ist();
        let id = repo
            .insert_queued("INFY.NS", Timeframe::FifteenMin, "lstm_bot", &serde_json::json!({}), now)
            .await
            .unwrap();

        let active = repo
            .find_active("INFY.NS", Timeframe::FifteenMin, "lstm_bot")
            .await
            .unwrap();
        assert_eq!(active.unwrap().id, id);

        // A different triple is unaffected.
        assert!(
            repo.find_active("TCS.NS", Timeframe::FifteenMin, "lstm_bot")
                .await
                .unwrap()
                .is_none()
        );

        repo.mark_finished(id, TrainingStatus::Failed, now, 0, &serde_json::Value::Null, Some("boom"))
            .await
            .unwrap();
        assert!(
            repo.find_active("INFY.NS", Timeframe::FifteenMin, "lstm_bot")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_open_in_fifo_order() {
        let (repo, _dir) = repo().await;
        let now = calendar::now_ist();
        let a = repo
            .insert_queued("INFY.NS", Timeframe::FiveMin, "momentum", &serde_json::json!({}), now)
            .await
            .unwrap();
        let b = repo
            .insert_queued("TCS.NS", Timeframe::FiveMin, "momentum", &serde_json::json!({}), now)
            .await
            .unwrap();

        let open = repo.list_open().await.unwrap();
        assert_eq!(open.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
    }
}
