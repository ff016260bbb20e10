//! Prometheus metrics definitions for tickcast.
//!
//! All metrics use the `tickcast_` prefix and are exposed read-only at
//! `GET /metrics`.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Cache lookups by tier and outcome (hit/miss).
    pub cache_lookups_total: CounterVec,
    /// Upstream provider calls by provider and outcome.
    pub provider_calls_total: CounterVec,
    /// Fallbacks from one provider to the next.
    pub provider_fallbacks_total: CounterVec,
    /// Candles dropped by the validator, by fault.
    pub candles_dropped_total: CounterVec,
    /// Merged predictions by final status (valid/sanitized/failed).
    pub predictions_total: CounterVec,
    /// Bot forecasts by bot and validation status.
    pub bot_forecasts_total: CounterVec,
    /// Scheduler ticks skipped because the market is closed.
    pub ticks_market_closed_total: CounterVec,
    /// Currently connected streaming sessions.
    pub sessions_active: GenericGauge<AtomicF64>,
    /// Outbound messages dropped by session-queue overflow.
    pub session_queue_drops_total: CounterVec,
    /// Training jobs by terminal status.
    pub training_jobs_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cache_lookups_total = CounterVec::new(
            Opts::new("tickcast_cache_lookups_total", "Cache lookups by tier and outcome"),
            &["tier", "outcome"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let provider_calls_total = CounterVec::new(
            Opts::new("tickcast_provider_calls_total", "Upstream provider calls"),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(provider_calls_total.clone()))?;

        let provider_fallbacks_total = CounterVec::new(
            Opts::new("tickcast_provider_fallbacks_total", "Provider fallback transitions"),
            &["from"],
        )?;
        registry.register(Box::new(provider_fallbacks_total.clone()))?;

        let candles_dropped_total = CounterVec::new(
            Opts::new("tickcast_candles_dropped_total", "Candles dropped by validation"),
            &["fault"],
        )?;
        registry.register(Box::new(candles_dropped_total.clone()))?;

        let predictions_total = CounterVec::new(
            Opts::new("tickcast_predictions_total", "Merged predictions by status"),
            &["status"],
        )?;
        registry.register(Box::new(predictions_total.clone()))?;

        let bot_forecasts_total = CounterVec::new(
            Opts::new("tickcast_bot_forecasts_total", "Bot forecasts by validation status"),
            &["bot", "status"],
        )?;
        registry.register(Box::new(bot_forecasts_total.clone()))?;

        let ticks_market_closed_total = CounterVec::new(
            Opts::new(
                "tickcast_ticks_market_closed_total",
                "Scheduler ticks short-circuited by the calendar gate",
            ),
            &["job"],
        )?;
        registry.register(Box::new(ticks_market_closed_total.clone()))?;

        let sessions_active = Gauge::with_opts(Opts::new(
            "tickcast_sessions_active",
            "Currently connected streaming sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let session_queue_drops_total = CounterVec::new(
            Opts::new(
                "tickcast_session_queue_drops_total",
                "Messages dropped by per-session queue overflow",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(session_queue_drops_total.clone()))?;

        let training_jobs_total = CounterVec::new(
            Opts::new("tickcast_training_jobs_total", "Training jobs by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(training_jobs_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cache_lookups_total,
            provider_calls_total,
            provider_fallbacks_total,
            candles_dropped_total,
            predictions_total,
            bot_forecasts_total,
            ticks_market_closed_total,
            sessions_active,
            session_queue_drops_total,
            training_jobs_total,
        })
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
