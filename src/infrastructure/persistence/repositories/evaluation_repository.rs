use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::market::prediction::Evaluation;
use crate::domain::market::timeframe::{Timeframe, ist_datetime};
use crate::domain::repositories::EvaluationRepository;

pub struct SqliteEvaluationRepository {
    pool: SqlitePool,
}

impl SqliteEvaluationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Evaluation> {
        let timeframe: String = row.try_get("timeframe")?;
        Ok(Evaluation {
            id: row.try_get("id")?,
            prediction_id: row.try_get("prediction_id")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            evaluated_at: ist_datetime(row.try_get("evaluated_at")?),
            mae: row.try_get("mae")?,
            mape: row.try_get("mape")?,
            direction_accuracy: row.try_get("direction_accuracy")?,
            points_compared: row.try_get::<i64, _>("points_compared")? as usize,
        })
    }
}

#[async_trait]
impl EvaluationRepository for SqliteEvaluationRepository {
    async fn save(&self, evaluation: &Evaluation) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO evaluations (
                prediction_id, symbol, timeframe, evaluated_at,
                mae, mape, direction_accuracy, points_compared
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(evaluation.prediction_id)
        .bind(&evaluation.symbol)
        .bind(evaluation.timeframe.to_string())
        .bind(evaluation.evaluated_at.timestamp())
        .bind(evaluation.mae)
        .bind(evaluation.mape)
        .bind(evaluation.direction_accuracy)
        .bind(evaluation.points_compared as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save evaluation")?;

        Ok(result.last_insert_rowid())
    }

    async fn list_for_prediction(&self, prediction_id: i64) -> Result<Vec<Evaluation>> {
        let rows = sqlx::query("SELECT * FROM evaluations WHERE prediction_id = ? ORDER BY id ASC")
            .bind(prediction_id)
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

    #[tokio::test]
    async fn test_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db", dir.path().display());
        let db = Database::new(&url, PoolSettings::default()).await.unwrap();
        let repo = SqliteEvaluationRepository::new(db.pool);

        let evaluation = Evaluation {
            id: 0,
            prediction_id: 7,
            symbol: "INFY.NS".to_string(),
            timeframe: Timeframe::FiveMin,
            evaluated_at: calendar::now_ist(),
            mae: 2.5,
            mape: 0.0017,
            direction_accuracy: 0.64,
            points_compared: 36,
        };
        let id = repo.save(&evaluation).await.unwrap();
        assert!(id > 0);

        let listed = repo.list_for_prediction(7).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].points_compared, 36);
        assert!(repo.list_for_prediction(99).await.unwrap().is_empty());
    }
}
