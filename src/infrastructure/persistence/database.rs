use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Pool sizing knobs surfaced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Steady-state reader/writer capacity.
    pub size: u32,
    /// Extra short-burst headroom.
    pub overflow: u32,
    /// Lifetime ceiling after which a connection is recycled.
    pub connection_ttl: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 20,
            overflow: 40,
            connection_ttl: Duration::from_secs(3600),
        }
    }
}

/// Singleton database wrapper owning the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, settings: PoolSettings) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.size + settings.overflow)
            .acquire_timeout(Duration::from_secs(5))
            .max_lifetime(settings.connection_ttl)
            // Verify connections before use so proxy-level idle closes
            // surface as a reconnect, not a query failure.
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema. A failure here is fatal to startup.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, start_ts)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles table")?;

        // Descending index for latest-N queries.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_latest
            ON candles (symbol, timeframe, start_ts DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candle index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                horizon_minutes INTEGER NOT NULL,
                overall_confidence REAL NOT NULL,
                predicted_series TEXT NOT NULL,
                bot_contributions TEXT NOT NULL,
                bot_raw_outputs TEXT NOT NULL,
                validation_flags TEXT NOT NULL,
                feature_snapshot TEXT NOT NULL,
                sanitization_summary TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create predictions table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_lookup
            ON predictions (symbol, timeframe, created_at DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create prediction index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                bot_name TEXT NOT NULL,
                status TEXT NOT NULL,
                queued_at INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                data_points INTEGER NOT NULL DEFAULT 0,
                metrics TEXT NOT NULL DEFAULT '{}',
                config TEXT NOT NULL DEFAULT '{}',
                error TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create training_records table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_training_triple_status
            ON training_records (symbol, timeframe, bot_name, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create training index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evaluations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prediction_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                evaluated_at INTEGER NOT NULL,
                mae REAL NOT NULL,
                mape REAL NOT NULL,
                direction_accuracy REAL NOT NULL,
                points_compared INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create evaluations table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_evaluations_prediction
            ON evaluations (prediction_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create evaluation index")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
