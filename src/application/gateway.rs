//! Provider Gateway: one `fetch_candles` capability over N upstream
//! providers with ordered fallback, normalization, cache integration and
//! per-key request coalescing.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::cache::{MarketDataCache, cache_key};
use crate::domain::calendar;
use crate::domain::errors::MarketDataError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;
use crate::domain::ports::MarketDataProvider;
use crate::domain::validation::CandleQualityFilter;
use crate::infrastructure::observability::metrics::Metrics;

type SharedFetch = Shared<BoxFuture<'static, Arc<Result<Vec<Candle>, ()>>>>;

pub struct ProviderGateway {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    cache: Arc<MarketDataCache>,
    metrics: Metrics,
    provider_timeout: Duration,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl ProviderGateway {
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        cache: Arc<MarketDataCache>,
        metrics: Metrics,
        provider_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            providers,
            cache,
            metrics,
            provider_timeout,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Fetches the fixed history window of candles for `(symbol, timeframe)`.
    ///
    /// Cache-first unless `bypass_cache`; concurrent calls for the same key
    /// coalesce onto a single upstream fetch. Returns `ProviderExhausted`
    /// only when every provider failed or produced zero valid candles.
    pub async fn fetch_candles(
        self: &Arc<Self>,
        symbol: &str,
        timeframe: Timeframe,
        bypass_cache: bool,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let key = cache_key(symbol, timeframe);

        if let Some(bytes) = self.cache.get(&key, bypass_cache).await {
            match serde_json::from_slice::<Vec<Candle>>(&bytes) {
                Ok(candles) => {
                    self.metrics
                        .cache_lookups_total
                        .with_label_values(&["combined", "hit"])
                        .inc();
                    return Ok(candles);
                }
                Err(e) => {
                    // A corrupt payload is treated as a miss.
                    warn!("Gateway: discarding undecodable cache entry {}: {}", key, e);
                    self.cache.invalidate(&key).await;
                }
            }
        }
        self.metrics
            .cache_lookups_total
            .with_label_values(&["combined", "miss"])
            .inc();

        let fetch = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let gateway = Arc::clone(self);
                    let owned_key = key.clone();
                    let owned_symbol = symbol.to_string();
                    let fut: SharedFetch = async move {
                        let outcome = gateway.fetch_upstream(&owned_symbol, timeframe).await;
                        gateway.in_flight.lock().await.remove(&owned_key);
                        Arc::new(outcome)
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        match fetch.await.as_ref() {
            Ok(candles) => Ok(candles.clone()),
            Err(()) => Err(MarketDataError::ProviderExhausted {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            }),
        }
    }

    /// Iterates providers in configured order; the first one yielding a
    /// non-empty valid result wins and populates the cache.
    async fn fetch_upstream(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, ()> {
        for (index, provider) in self.providers.iter().enumerate() {
            let outcome = tokio::time::timeout(
                self.provider_timeout,
                provider.fetch_candles(symbol, timeframe),
            )
            .await;

            let raw = match outcome {
                Ok(Ok(candles)) => candles,
                Ok(Err(e)) => {
                    warn!(
                        "Gateway: provider {} failed for {} {}: {}",
                        provider.name(),
                        symbol,
                        timeframe,
                        e
                    );
                    self.record_miss(provider.name(), "error", index);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Gateway: provider {} timed out after {:?} for {} {}",
                        provider.name(),
                        self.provider_timeout,
                        symbol,
                        timeframe
                    );
                    self.record_miss(provider.name(), "timeout", index);
                    continue;
                }
            };

            let candles = self.normalize(raw, provider.name());
            if candles.is_empty() {
                debug!(
                    "Gateway: provider {} returned zero valid candles for {} {}",
                    provider.name(),
                    symbol,
                    timeframe
                );
                self.record_miss(provider.name(), "empty", index);
                continue;
            }

            self.metrics
                .provider_calls_total
                .with_label_values(&[provider.name(), "ok"])
                .inc();
            info!(
                "Gateway: {} candles for {} {} via {}",
                candles.len(),
                symbol,
                timeframe,
                provider.name()
            );

            let key = cache_key(symbol, timeframe);
            if let Ok(bytes) = serde_json::to_vec(&candles) {
                self.cache.put(&key, bytes).await;
            }
            return Ok(candles);
        }

        warn!("Gateway: all providers exhausted for {} {}", symbol, timeframe);
        Err(())
    }

    fn record_miss(&self, provider: &str, outcome: &str, index: usize) {
        self.metrics
            .provider_calls_total
            .with_label_values(&[provider, outcome])
            .inc();
        if index + 1 < self.providers.len() {
            self.metrics
                .provider_fallbacks_total
                .with_label_values(&[provider])
                .inc();
        }
    }

    /// Provider-truthful normalization: out-of-order entries are dropped
    /// with a warning (never reordered), then each candle is checked against
    /// the full invariant set.
    fn normalize(&self, raw: Vec<Candle>, provider: &str) -> Vec<Candle> {
        let now = calendar::now_ist();

        let mut ordered = Vec::with_capacity(raw.len());
        let mut last_ts = None;
        let mut out_of_order = 0usize;
        for candle in raw {
            match last_ts {
                Some(prev) if candle.start_ts <= prev => out_of_order += 1,
                _ => {
                    last_ts = Some(candle.start_ts);
                    ordered.push(candle);
                }
            }
        }
        if out_of_order > 0 {
            warn!(
                "Gateway: dropped {} out-of-order candles from {}",
                out_of_order, provider
            );
            self.metrics
                .candles_dropped_total
                .with_label_values(&["out_of_order"])
                .inc_by(out_of_order as f64);
        }

        let total = ordered.len();
        let kept: Vec<Candle> = ordered
            .into_iter()
            .filter(|c| match CandleQualityFilter::check(c, now) {
                None => true,
                Some(fault) => {
                    self.metrics
                        .candles_dropped_total
                        .with_label_values(&[fault.as_str()])
                        .inc();
                    false
                }
            })
            .collect();
        if kept.len() < total {
            debug!(
                "Gateway: validator dropped {} of {} candles from {}",
                total - kept.len(),
                total,
                provider
            );
        }
        kept
    }
}
