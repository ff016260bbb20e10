//! Calendar gating: when the market is closed, scheduler jobs return
//! immediately with zero upstream calls and zero broadcasts.

use chrono::TimeZone;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tickcast::application::bots::BotRegistry;
use tickcast::application::cache::MarketDataCache;
use tickcast::application::evaluation::PredictionEvaluator;
use tickcast::application::gateway::ProviderGateway;
use tickcast::application::merger::PredictionMerger;
use tickcast::application::scheduler::{Scheduler, SchedulerSettings};
use tickcast::application::subscriptions::SubscriptionRegistry;
use tickcast::domain::calendar;
use tickcast::domain::market::timeframe::Timeframe;
use tickcast::domain::market::types::Topic;
use tickcast::domain::repositories::{
    CandleRepository, EvaluationRepository, PredictionRepository,
};
use tickcast::infrastructure::observability::metrics::Metrics;
use tickcast::infrastructure::persistence::database::{Database, PoolSettings};
use tickcast::infrastructure::persistence::{
    SqliteCandleRepository, SqliteEvaluationRepository, SqlitePredictionRepository,
};
use tickcast::infrastructure::providers::mock::MockProvider;

struct Harness {
    scheduler: Arc<Scheduler>,
    provider: Arc<MockProvider>,
    subscriptions: Arc<SubscriptionRegistry>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

async fn harness() -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let artifact_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/test.db", db_dir.path().display());
    let db = Database::new(&url, PoolSettings::default()).await.unwrap();

    let candles: Arc<dyn CandleRepository> =
        Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let predictions: Arc<dyn PredictionRepository> =
        Arc::new(SqlitePredictionRepository::new(db.pool.clone()));
    let evaluations: Arc<dyn EvaluationRepository> =
        Arc::new(SqliteEvaluationRepository::new(db.pool.clone()));

    let metrics = Metrics::new().unwrap();
    let provider = Arc::new(MockProvider::synthetic());
    let cache = Arc::new(MarketDataCache::new(64, Duration::from_secs(30), None));
    let gateway = ProviderGateway::new(
        vec![provider.clone()],
        cache,
        metrics.clone(),
        Duration::from_secs(2),
    );

    let registry = Arc::new(BotRegistry::standard(artifact_dir.path()));
    let merger = Arc::new(PredictionMerger::new(
        Arc::clone(&candles),
        Arc::clone(&predictions),
        registry,
        metrics.clone(),
        Duration::from_secs(8),
        Duration::from_secs(30),
    ));
    let evaluator = Arc::new(PredictionEvaluator::new(
        Arc::clone(&predictions),
        evaluations,
        Arc::clone(&candles),
    ));
    let subscriptions = SubscriptionRegistry::new(64, metrics.clone());

    let scheduler = Scheduler::new(
        gateway,
        candles,
        merger,
        evaluator,
        Arc::clone(&subscriptions),
        metrics,
        SchedulerSettings::default(),
        vec![Topic::new("TCS.NS", Timeframe::FiveMin)],
    );

    Harness {
        scheduler,
        provider,
        subscriptions,
        _dirs: (db_dir, artifact_dir),
    }
}

#[tokio::test]
async fn closed_market_short_circuits_refresh() {
    let h = harness().await;
    let topic = Topic::new("TCS.NS", Timeframe::FiveMin);

    // A subscribed session would receive any broadcast.
    let session = Uuid::new_v4();
    let queue = h.subscriptions.register(session).await;
    h.subscriptions.subscribe(session, topic.clone()).await;
    queue.next().await.unwrap(); // drain the subscribed ack

    // Sunday 10:00 IST.
    let sunday = calendar::ist()
        .with_ymd_and_hms(2025, 7, 6, 10, 0, 0)
        .unwrap();
    assert!(!calendar::is_market_open(sunday));

    h.scheduler.refresh_topic(&topic, sunday).await;
    h.scheduler.emit_prediction(&topic, sunday).await;
    h.scheduler.run_evaluation(sunday).await;

    // Zero provider invocations, zero broadcasts.
    assert_eq!(h.provider.call_count(), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn open_market_reaches_upstream() {
    let h = harness().await;
    let topic = Topic::new("TCS.NS", Timeframe::FiveMin);

    // A trading Wednesday, mid-session.
    let wednesday = calendar::ist()
        .with_ymd_and_hms(2025, 7, 9, 11, 0, 0)
        .unwrap();
    assert!(calendar::is_market_open(wednesday));

    h.scheduler.refresh_topic(&topic, wednesday).await;
    assert_eq!(h.provider.call_count(), 1);
}
