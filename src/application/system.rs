//! Application wiring: builds every component from configuration and starts
//! the long-running pieces.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::bots::BotRegistry;
use crate::application::cache::MarketDataCache;
use crate::application::evaluation::PredictionEvaluator;
use crate::application::gateway::ProviderGateway;
use crate::application::merger::PredictionMerger;
use crate::application::scheduler::{Scheduler, SchedulerSettings};
use crate::application::subscriptions::SubscriptionRegistry;
use crate::application::training::{self, TrainingQueue};
use crate::config::{Config, ProviderKind};
use crate::domain::ports::MarketDataProvider;
use crate::domain::repositories::{
    CandleRepository, EvaluationRepository, PredictionRepository, TrainingRepository,
};
use crate::infrastructure::cache::SharedCacheClient;
use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::persistence::{
    Database, PoolSettings, SqliteCandleRepository, SqliteEvaluationRepository,
    SqlitePredictionRepository, SqliteTrainingRepository,
};
use crate::infrastructure::providers::mock::MockProvider;
use crate::infrastructure::providers::twelvedata::TwelveDataProvider;
use crate::infrastructure::providers::yahoo::YahooProvider;

pub struct Application {
    pub config: Config,
    pub database: Database,
    pub metrics: Metrics,
    pub cache: Arc<MarketDataCache>,
    pub gateway: Arc<ProviderGateway>,
    pub candle_repo: Arc<dyn CandleRepository>,
    pub prediction_repo: Arc<dyn PredictionRepository>,
    pub training_repo: Arc<dyn TrainingRepository>,
    pub evaluation_repo: Arc<dyn EvaluationRepository>,
    pub registry: Arc<BotRegistry>,
    pub merger: Arc<PredictionMerger>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub training_queue: Arc<TrainingQueue>,
    pub scheduler: Arc<Scheduler>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        // An unwritable artifact directory is a startup abort, not a
        // per-prediction surprise.
        std::fs::create_dir_all(&config.artifact_dir)
            .with_context(|| format!("Artifact directory {:?} unwritable", config.artifact_dir))?;

        let metrics = Metrics::new()?;

        let database = Database::new(
            &config.database_url,
            PoolSettings {
                size: config.db_pool_size,
                overflow: config.db_pool_overflow,
                connection_ttl: Duration::from_secs(config.db_connection_ttl_seconds),
            },
        )
        .await?;

        let candle_repo: Arc<dyn CandleRepository> =
            Arc::new(SqliteCandleRepository::new(database.pool.clone()));
        let prediction_repo: Arc<dyn PredictionRepository> =
            Arc::new(SqlitePredictionRepository::new(database.pool.clone()));
        let training_repo: Arc<dyn TrainingRepository> =
            Arc::new(SqliteTrainingRepository::new(database.pool.clone()));
        let evaluation_repo: Arc<dyn EvaluationRepository> =
            Arc::new(SqliteEvaluationRepository::new(database.pool.clone()));

        training::fail_orphaned_jobs(training_repo.as_ref()).await?;

        let hot = config
            .hot_cache_url
            .as_ref()
            .map(|url| SharedCacheClient::new(url.clone()));
        let cache = Arc::new(MarketDataCache::new(
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_seconds),
            hot,
        ));

        let provider_timeout = Duration::from_secs(config.provider_timeout_seconds);
        let providers: Vec<Arc<dyn MarketDataProvider>> = config
            .provider_order()
            .into_iter()
            .map(|kind| -> Arc<dyn MarketDataProvider> {
                match kind {
                    ProviderKind::Yahoo => Arc::new(YahooProvider::new(provider_timeout)),
                    ProviderKind::TwelveData => Arc::new(TwelveDataProvider::new(
                        config.twelvedata_api_key.clone(),
                        provider_timeout,
                    )),
                    ProviderKind::Mock => Arc::new(MockProvider::synthetic()),
                }
            })
            .collect();
        info!("Provider order: {:?}", config.provider_order());

        let gateway = ProviderGateway::new(
            providers,
            Arc::clone(&cache),
            metrics.clone(),
            provider_timeout,
        );

        let registry = Arc::new(BotRegistry::standard(&config.artifact_dir));
        info!("Registered bots: {:?}", registry.names());

        let merger = Arc::new(PredictionMerger::new(
            Arc::clone(&candle_repo),
            Arc::clone(&prediction_repo),
            Arc::clone(&registry),
            metrics.clone(),
            Duration::from_secs(config.bot_predict_timeout_seconds),
            Duration::from_secs(config.merger_timeout_seconds),
        ));

        let subscriptions =
            SubscriptionRegistry::new(config.subscription_queue_depth, metrics.clone());

        let training_queue = TrainingQueue::start(
            Arc::clone(&training_repo),
            Arc::clone(&candle_repo),
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            metrics.clone(),
            config.training_parallelism,
        );

        let evaluator = Arc::new(PredictionEvaluator::new(
            Arc::clone(&prediction_repo),
            Arc::clone(&evaluation_repo),
            Arc::clone(&candle_repo),
        ));

        let scheduler = Scheduler::new(
            Arc::clone(&gateway),
            Arc::clone(&candle_repo),
            Arc::clone(&merger),
            evaluator,
            Arc::clone(&subscriptions),
            metrics.clone(),
            SchedulerSettings {
                realtime_interval: Duration::from_secs(config.scheduler_realtime_interval_seconds),
                prediction_interval: Duration::from_secs(
                    config.scheduler_prediction_interval_seconds,
                ),
                evaluation_interval: Duration::from_secs(60),
                max_instances: config.max_instances_per_job,
                misfire_grace: Duration::from_secs(config.misfire_grace_seconds),
                default_horizon_minutes: config.default_horizon_minutes,
            },
            config.watchlist.clone(),
        );

        Ok(Self {
            config,
            database,
            metrics,
            cache,
            gateway,
            candle_repo,
            prediction_repo,
            training_repo,
            evaluation_repo,
            registry,
            merger,
            subscriptions,
            training_queue,
            scheduler,
        })
    }

    /// Starts the scheduler loops. The HTTP surface is served separately by
    /// the binary.
    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
