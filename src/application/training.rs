//! Process-wide training queue.
//!
//! FIFO over job ids with the dedupe invariant: at most one non-terminal
//! record per `(symbol, timeframe, bot)`. Jobs run sequentially by default;
//! a semaphore permits up to N parallel trainings (N bounded by CPU count).
//! Status transitions are persisted and emitted on the job's topic.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{error, info, warn};

use crate::application::bots::BotRegistry;
use crate::application::subscriptions::{ServerMessage, SubscriptionRegistry};
use crate::domain::calendar;
use crate::domain::errors::TrainingError;
use crate::domain::market::prediction::{TrainingRecord, TrainingStatus};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Topic;
use crate::domain::repositories::{CandleRepository, TrainingRepository};
use crate::infrastructure::observability::metrics::Metrics;

/// History size handed to a training run.
const TRAINING_HISTORY_LIMIT: usize = 5_000;

pub struct TrainingQueue {
    repo: Arc<dyn TrainingRepository>,
    candles: Arc<dyn CandleRepository>,
    registry: Arc<BotRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    metrics: Metrics,
    tx: mpsc::UnboundedSender<i64>,
    /// Serializes the check-then-insert in `enqueue` so two concurrent
    /// requests for the same triple cannot both pass the dedupe check.
    enqueue_gate: Mutex<()>,
}

impl TrainingQueue {
    pub fn start(
        repo: Arc<dyn TrainingRepository>,
        candles: Arc<dyn CandleRepository>,
        registry: Arc<BotRegistry>,
        subscriptions: Arc<SubscriptionRegistry>,
        metrics: Metrics,
        parallelism: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            repo,
            candles,
            registry,
            subscriptions,
            metrics,
            tx,
            enqueue_gate: Mutex::new(()),
        });

        let parallelism = parallelism.clamp(1, num_cpus());
        tokio::spawn(Self::worker_loop(Arc::clone(&queue), rx, parallelism));
        info!("Training queue started (parallelism {})", parallelism);
        queue
    }

    /// Enqueues one job. Rejects duplicates of any non-terminal job for the
    /// same `(symbol, timeframe, bot)` with the existing job id.
    pub async fn enqueue(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
        config: serde_json::Value,
    ) -> Result<i64, TrainingError> {
        if self.registry.get(bot_name).is_none() {
            return Err(TrainingError::UnknownBot {
                name: bot_name.to_string(),
            });
        }

        let _gate = self.enqueue_gate.lock().await;
        if let Some(existing) = self.repo.find_active(symbol, timeframe, bot_name).await? {
            return Err(TrainingError::AlreadyQueued {
                job_id: existing.id,
            });
        }

        let id = self
            .repo
            .insert_queued(symbol, timeframe, bot_name, &config, calendar::now_ist())
            .await?;
        drop(_gate);

        self.emit_status(symbol, timeframe, bot_name, id, TrainingStatus::Queued)
            .await;
        self.tx
            .send(id)
            .map_err(|_| TrainingError::Other(anyhow::anyhow!("training worker is gone")))?;
        info!("Training job {} queued: {} {} {}", id, symbol, timeframe, bot_name);
        Ok(id)
    }

    /// Current queue plus in-flight jobs.
    pub async fn status(&self) -> anyhow::Result<Vec<TrainingRecord>> {
        self.repo.list_open().await
    }

    async fn worker_loop(
        queue: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<i64>,
        parallelism: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(parallelism));
        while let Some(job_id) = rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.run_job(job_id).await;
                drop(permit);
            });
        }
    }

    async fn run_job(&self, job_id: i64) {
        let record = match self.repo.fetch(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Training job {} vanished before it ran", job_id);
                return;
            }
            Err(e) => {
                error!("Training job {}: fetch failed: {:#}", job_id, e);
                return;
            }
        };

        if let Err(e) = self.repo.mark_running(job_id, calendar::now_ist()).await {
            error!("Training job {}: mark running failed: {:#}", job_id, e);
            return;
        }
        self.emit_status(
            &record.symbol,
            record.timeframe,
            &record.bot_name,
            job_id,
            TrainingStatus::Running,
        )
        .await;

        let outcome = self.train(&record).await;
        let (status, data_points, metrics_json, error_text) = match outcome {
            Ok((metrics_json, data_points)) => {
                (TrainingStatus::Completed, data_points, metrics_json, None)
            }
            Err(reason) => {
                warn!("Training job {} failed: {}", job_id, reason);
                (TrainingStatus::Failed, 0, serde_json::Value::Null, Some(reason))
            }
        };

        if let Err(e) = self
            .repo
            .mark_finished(
                job_id,
                status,
                calendar::now_ist(),
                data_points,
                &metrics_json,
                error_text.as_deref(),
            )
            .await
        {
            error!("Training job {}: mark finished failed: {:#}", job_id, e);
        }
        self.metrics
            .training_jobs_total
            .with_label_values(&[status.as_str()])
            .inc();
        self.emit_status(&record.symbol, record.timeframe, &record.bot_name, job_id, status)
            .await;
        info!("Training job {} finished: {}", job_id, status.as_str());
    }

    async fn train(&self, record: &TrainingRecord) -> Result<(serde_json::Value, i64), String> {
        let adapter = self
            .registry
            .get(&record.bot_name)
            .ok_or_else(|| format!("bot {} unregistered mid-flight", record.bot_name))?;

        let candles = self
            .candles
            .range(&record.symbol, record.timeframe, None, None, TRAINING_HISTORY_LIMIT)
            .await
            .map_err(|e| format!("history load failed: {:#}", e))?;
        if candles.is_empty() {
            return Err("no candle history to train on".to_string());
        }

        let symbol = record.symbol.clone();
        let timeframe = record.timeframe;
        let config = record.config.clone();
        let outcome =
            tokio::task::spawn_blocking(move || adapter.train(&symbol, timeframe, &candles, &config))
                .await
                .map_err(|e| format!("training task panicked: {}", e))??;

        Ok((
            serde_json::json!({
                "metrics": outcome.metrics,
                "params": outcome.params,
            }),
            outcome.data_points as i64,
        ))
    }

    async fn emit_status(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
        job_id: i64,
        status: TrainingStatus,
    ) {
        let topic = Topic::new(symbol, timeframe);
        self.subscriptions
            .publish(
                &topic,
                ServerMessage::TrainingStatusUpdate {
                    symbol: symbol.to_string(),
                    timeframe,
                    bot_name: bot_name.to_string(),
                    job_id,
                    status,
                },
            )
            .await;
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Stale-job recovery at startup: anything left `running` by a previous
/// process is marked failed so the dedupe invariant cannot wedge a triple
/// forever.
pub async fn fail_orphaned_jobs(repo: &dyn TrainingRepository) -> anyhow::Result<usize> {
    let open = repo.list_open().await?;
    let mut failed = 0usize;
    for record in open {
        if record.status == TrainingStatus::Running
            || record.queued_at < calendar::now_ist() - ChronoDuration::days(1)
        {
            repo.mark_finished(
                record.id,
                TrainingStatus::Failed,
                calendar::now_ist(),
                0,
                &serde_json::Value::Null,
                Some("orphaned by restart"),
            )
            .await?;
            failed += 1;
        }
    }
    if failed > 0 {
        warn!("Failed {} orphaned training jobs at startup", failed);
    }
    Ok(failed)
}
