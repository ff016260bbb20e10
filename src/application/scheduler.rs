//! Calendar-gated periodic executor.
//!
//! Three job classes: realtime candle refresh, prediction emission and the
//! evaluation sweep. Every run is gated by the exchange calendar before any
//! upstream I/O. Per-job discipline: `coalesce` (missed ticks collapse into
//! one), `max_instances` overlapping runs per job id, and a misfire grace
//! window beyond which a late run is skipped rather than executed.

use chrono::DateTime;
use chrono::FixedOffset;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::application::evaluation::PredictionEvaluator;
use crate::application::gateway::ProviderGateway;
use crate::application::merger::PredictionMerger;
use crate::application::subscriptions::{ServerMessage, SubscriptionRegistry};
use crate::domain::calendar;
use crate::domain::errors::MergeError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Topic;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub realtime_interval: Duration,
    /// Emission period for the 5m timeframe; other timeframes derive theirs
    /// from the grid step.
    pub prediction_interval: Duration,
    pub evaluation_interval: Duration,
    pub max_instances: usize,
    pub misfire_grace: Duration,
    pub default_horizon_minutes: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            realtime_interval: Duration::from_secs(5),
            prediction_interval: Duration::from_secs(300),
            evaluation_interval: Duration::from_secs(60),
            max_instances: 3,
            misfire_grace: Duration::from_secs(10),
            default_horizon_minutes: 180,
        }
    }
}

/// Overlap guard for one job id.
struct JobGate {
    running: AtomicUsize,
    max_instances: usize,
}

impl JobGate {
    fn new(max_instances: usize) -> Self {
        Self {
            running: AtomicUsize::new(0),
            max_instances: max_instances.max(1),
        }
    }

    /// Tries to claim a run slot; the returned guard releases it on drop.
    fn try_claim(self: &Arc<Self>) -> Option<JobSlot> {
        let mut current = self.running.load(Ordering::Acquire);
        loop {
            if current >= self.max_instances {
                return None;
            }
            match self.running.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(JobSlot(Arc::clone(self))),
                Err(actual) => current = actual,
            }
        }
    }
}

struct JobSlot(Arc<JobGate>);

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One of the three process-wide singletons: built at startup, shut down at
/// teardown, never re-initialized.
pub struct Scheduler {
    gateway: Arc<ProviderGateway>,
    candles: Arc<dyn CandleRepository>,
    merger: Arc<PredictionMerger>,
    evaluator: Arc<PredictionEvaluator>,
    subscriptions: Arc<SubscriptionRegistry>,
    metrics: Metrics,
    settings: SchedulerSettings,
    watchlist: Vec<Topic>,
    gates: tokio::sync::Mutex<HashMap<String, Arc<JobGate>>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<ProviderGateway>,
        candles: Arc<dyn CandleRepository>,
        merger: Arc<PredictionMerger>,
        evaluator: Arc<PredictionEvaluator>,
        subscriptions: Arc<SubscriptionRegistry>,
        metrics: Metrics,
        settings: SchedulerSettings,
        watchlist: Vec<Topic>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            candles,
            merger,
            evaluator,
            subscriptions,
            metrics,
            settings,
            watchlist,
            gates: tokio::sync::Mutex::new(HashMap::new()),
            handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Spawns the three job loops.
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;
        handles.push(tokio::spawn(Arc::clone(self).realtime_loop()));
        handles.push(tokio::spawn(Arc::clone(self).prediction_loop()));
        handles.push(tokio::spawn(Arc::clone(self).evaluation_loop()));
        info!(
            "Scheduler started: refresh {:?}, prediction {:?}, evaluation {:?}, watchlist {} topics",
            self.settings.realtime_interval,
            self.settings.prediction_interval,
            self.settings.evaluation_interval,
            self.watchlist.len()
        );
    }

    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Scheduler stopped.");
    }

    /// Subscribed topics plus the configured watchlist, deduplicated.
    async fn active_topics(&self) -> Vec<Topic> {
        let mut topics = self.watchlist.clone();
        for topic in self.subscriptions.active_topics().await {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }

    async fn gate(&self, job_id: &str) -> Arc<JobGate> {
        let mut gates = self.gates.lock().await;
        Arc::clone(
            gates
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(JobGate::new(self.settings.max_instances))),
        )
    }

    async fn realtime_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.realtime_interval);
        // Coalesce: ticks missed while a run blocks collapse into one.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let scheduled = ticker.tick().await;
            if misfired(scheduled.into_std(), self.settings.misfire_grace) {
                warn!("Realtime refresh tick missed its grace window, skipping");
                continue;
            }
            for topic in self.active_topics().await {
                let job_id = format!("refresh:{}", topic);
                let gate = self.gate(&job_id).await;
                let Some(slot) = gate.try_claim() else {
                    debug!("Job {} at max instances, skipping tick", job_id);
                    continue;
                };
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    scheduler.refresh_topic(&topic, calendar::now_ist()).await;
                    drop(slot);
                });
            }
        }
    }

    async fn prediction_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_due: HashMap<Topic, Instant> = HashMap::new();
        loop {
            ticker.tick().await;
            let now = Instant::now();
            for topic in self.active_topics().await {
                let interval = self.emission_interval(topic.timeframe);
                let due = *next_due.entry(topic.clone()).or_insert(now);
                if now < due {
                    continue;
                }
                // Coalesce missed emissions: the next slot is measured from
                // now, not from the missed schedule.
                next_due.insert(topic.clone(), now + interval);
                if now.duration_since(due) > interval + self.settings.misfire_grace {
                    warn!("Prediction emission for {} missed its grace window", topic);
                    continue;
                }

                let job_id = format!("predict:{}", topic);
                let gate = self.gate(&job_id).await;
                let Some(slot) = gate.try_claim() else {
                    debug!("Job {} at max instances, skipping tick", job_id);
                    continue;
                };
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    scheduler.emit_prediction(&topic, calendar::now_ist()).await;
                    drop(slot);
                });
            }
            // Forget topics that left the active set.
            let active = self.active_topics().await;
            next_due.retain(|topic, _| active.contains(topic));
        }
    }

    async fn evaluation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.evaluation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.run_evaluation(calendar::now_ist()).await;
        }
    }

    fn emission_interval(&self, timeframe: Timeframe) -> Duration {
        if timeframe == Timeframe::FiveMin {
            self.settings.prediction_interval
        } else {
            Duration::from_secs(timeframe.prediction_interval_secs())
        }
    }

    /// Realtime candle refresh for one topic. The calendar gate comes first:
    /// a closed market means no upstream I/O and no broadcast at all.
    pub async fn refresh_topic(&self, topic: &Topic, now: DateTime<FixedOffset>) {
        if !calendar::is_market_open(now) {
            self.metrics
                .ticks_market_closed_total
                .with_label_values(&["refresh"])
                .inc();
            debug!(
                "Market closed for {}; next session opens {}",
                topic,
                calendar::next_session_open(now)
            );
            return;
        }

        let fetched = self
            .gateway
            .fetch_candles(&topic.symbol, topic.timeframe, true)
            .await;
        let candles = match fetched {
            Ok(candles) => candles,
            Err(e) => {
                // Tick-level retry budget: log and let the next tick try again.
                warn!("Refresh {} failed: {}", topic, e);
                return;
            }
        };
        let Some(latest) = candles.last().cloned() else {
            return;
        };

        match self.candles.upsert_batch(&candles, now).await {
            Ok(stats) if stats.changed() => {
                self.subscriptions
                    .publish(
                        topic,
                        ServerMessage::CandleUpdate {
                            symbol: topic.symbol.clone(),
                            timeframe: topic.timeframe,
                            candle: latest,
                        },
                    )
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!("Refresh {}: upsert failed: {:#}", topic, e),
        }
    }

    /// Scheduled prediction emission for one topic.
    pub async fn emit_prediction(&self, topic: &Topic, now: DateTime<FixedOffset>) {
        if !calendar::is_market_open(now) {
            self.metrics
                .ticks_market_closed_total
                .with_label_values(&["predict"])
                .inc();
            return;
        }

        match self
            .merger
            .merge(
                &topic.symbol,
                topic.timeframe,
                self.settings.default_horizon_minutes,
                None,
            )
            .await
        {
            Ok(prediction) => {
                self.subscriptions
                    .publish(
                        topic,
                        ServerMessage::PredictionUpdate {
                            symbol: topic.symbol.clone(),
                            timeframe: topic.timeframe,
                            prediction,
                        },
                    )
                    .await;
            }
            Err(MergeError::AllBotsRejected { .. }) => {
                // Surfaced in metrics by the merger; nothing is broadcast.
                debug!("Prediction emission for {}: all bots rejected", topic);
            }
            Err(e) => warn!("Prediction emission for {} failed: {}", topic, e),
        }
    }

    /// Evaluation sweep; calendar-gated like every other job.
    pub async fn run_evaluation(&self, now: DateTime<FixedOffset>) {
        if !calendar::is_market_open(now) {
            self.metrics
                .ticks_market_closed_total
                .with_label_values(&["evaluate"])
                .inc();
            return;
        }
        if let Err(e) = self.evaluator.sweep(now).await {
            warn!("Evaluation sweep failed: {:#}", e);
        }
    }
}

/// A tick whose scheduled instant is already further in the past than the
/// grace window is treated as misfired.
fn misfired(scheduled: Instant, grace: Duration) -> bool {
    Instant::now().saturating_duration_since(scheduled) > grace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_gate_respects_max_instances() {
        let gate = Arc::new(JobGate::new(3));
        let a = gate.try_claim().unwrap();
        let _b = gate.try_claim().unwrap();
        let _c = gate.try_claim().unwrap();
        assert!(gate.try_claim().is_none());

        drop(a);
        assert!(gate.try_claim().is_some());
    }

    #[test]
    fn test_misfire_detection() {
        assert!(!misfired(Instant::now(), Duration::from_secs(10)));
        let stale = Instant::now() - Duration::from_secs(30);
        assert!(misfired(stale, Duration::from_secs(10)));
    }
}
