//! Subscription fabric state machine and backpressure, exercised at the
//! registry level (the WebSocket layer above it is a thin adapter).

use chrono::TimeZone;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use tickcast::application::subscriptions::{ServerMessage, SubscriptionRegistry};
use tickcast::domain::calendar;
use tickcast::domain::market::prediction::{
    FeatureSnapshot, MergedPrediction, SanitizationSummary,
};
use tickcast::domain::market::timeframe::Timeframe;
use tickcast::domain::market::types::{Candle, Topic};
use tickcast::infrastructure::observability::metrics::Metrics;

fn registry() -> Arc<SubscriptionRegistry> {
    SubscriptionRegistry::new(64, Metrics::new().unwrap())
}

fn topic() -> Topic {
    Topic::new("INFY.NS", Timeframe::FiveMin)
}

fn candle_update(n: i64) -> ServerMessage {
    ServerMessage::CandleUpdate {
        symbol: "INFY.NS".to_string(),
        timeframe: Timeframe::FiveMin,
        candle: Candle {
            symbol: "INFY.NS".to_string(),
            timeframe: Timeframe::FiveMin,
            start_ts: calendar::ist()
                .with_ymd_and_hms(2025, 7, 9, 10, 0, 0)
                .unwrap(),
            open: dec!(1500),
            high: dec!(1510),
            low: dec!(1495),
            close: rust_decimal::Decimal::from(1500 + n),
            volume: dec!(10000),
        },
    }
}

fn prediction_update() -> ServerMessage {
    ServerMessage::PredictionUpdate {
        symbol: "INFY.NS".to_string(),
        timeframe: Timeframe::FiveMin,
        prediction: MergedPrediction {
            id: 42,
            symbol: "INFY.NS".to_string(),
            timeframe: Timeframe::FiveMin,
            created_at: calendar::now_ist(),
            horizon_minutes: 30,
            predicted_series: vec![],
            overall_confidence: 0.6,
            bot_contributions: vec![],
            bot_raw_outputs: vec![],
            validation_flags: vec![],
            feature_snapshot: FeatureSnapshot {
                latest_close: 1500.0,
                sma_20: 1500.0,
                volatility_20: 0.0,
                volume_avg: 0.0,
            },
            sanitization_summary: SanitizationSummary::default(),
        },
    }
}

#[tokio::test]
async fn resubscribe_after_unsubscribe_matches_fresh_subscribe() {
    let registry = registry();
    let id = Uuid::new_v4();
    let queue = registry.register(id).await;

    registry.subscribe(id, topic()).await;
    registry.unsubscribe(id).await;
    registry.subscribe(id, topic()).await;

    // Same state as a single subscribe: one active topic.
    assert_eq!(registry.current_topic(id).await, Some(topic()));
    assert_eq!(registry.active_topics().await, vec![topic()]);

    // Both subscribe calls acked on the session queue.
    assert!(matches!(
        queue.next().await,
        Some(ServerMessage::Subscribed { .. })
    ));
    assert!(matches!(
        queue.next().await,
        Some(ServerMessage::Subscribed { .. })
    ));
}

#[tokio::test]
async fn blocked_writer_drops_only_oldest_candles() {
    let registry = registry();
    let id = Uuid::new_v4();
    let queue = registry.register(id).await;
    registry.subscribe(id, topic()).await;
    queue.next().await.unwrap(); // drain ack

    // Writer is "blocked": nothing drains while 65 candles and one
    // prediction arrive.
    for n in 0..65 {
        registry.publish(&topic(), candle_update(n)).await;
    }
    registry.publish(&topic(), prediction_update()).await;

    // Drain after the writer "resumes".
    queue.close();
    let mut candles = Vec::new();
    let mut predictions = 0usize;
    while let Some(message) = queue.next().await {
        match message {
            ServerMessage::CandleUpdate { candle, .. } => candles.push(candle.close),
            ServerMessage::PredictionUpdate { .. } => predictions += 1,
            _ => {}
        }
    }

    // 64 candles delivered (the oldest was dropped) plus the prediction.
    assert_eq!(candles.len(), 64);
    assert_eq!(predictions, 1);
    assert_eq!(candles[0], rust_decimal::Decimal::from(1501));
    assert_eq!(*candles.last().unwrap(), rust_decimal::Decimal::from(1564));
}

#[tokio::test]
async fn broadcasts_do_not_cross_topics() {
    let registry = registry();
    let infy = Uuid::new_v4();
    let tcs = Uuid::new_v4();
    let infy_queue = registry.register(infy).await;
    let tcs_queue = registry.register(tcs).await;
    registry.subscribe(infy, topic()).await;
    registry
        .subscribe(tcs, Topic::new("TCS.NS", Timeframe::FiveMin))
        .await;
    infy_queue.next().await.unwrap();
    tcs_queue.next().await.unwrap();

    registry.publish(&topic(), candle_update(1)).await;

    assert_eq!(infy_queue.len(), 1);
    assert!(tcs_queue.is_empty());
}

#[tokio::test]
async fn removed_session_receives_nothing() {
    let registry = registry();
    let id = Uuid::new_v4();
    let queue = registry.register(id).await;
    registry.subscribe(id, topic()).await;
    queue.next().await.unwrap();

    registry.remove(id).await;
    registry.publish(&topic(), candle_update(1)).await;

    // The queue is closed and stays empty.
    assert!(queue.next().await.is_none());
    assert_eq!(registry.session_count().await, 0);
}
