//! Yahoo Finance chart API provider.
//!
//! Fetches `/v8/finance/chart/{symbol}` with an epoch window derived from
//! the timeframe's fixed history window. Yahoo already understands the
//! `.NS`/`.BO` venue suffixes, so no symbol translation is needed. Yahoo has
//! no 4h interval; that timeframe is fetched as 1h bars and aggregated onto
//! the 4h grid here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::calendar;
use crate::domain::market::timeframe::{Timeframe, ist_datetime};
use crate::domain::market::types::Candle;
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::core::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::infrastructure::core::http_client_factory::{build_http_client, build_url_with_query};

pub struct YahooProvider {
    client: ClientWithMiddleware,
    base_url: String,
    breaker: CircuitBreaker,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com".to_string(), timeout)
    }

    pub fn with_base_url(base_url: String, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url,
            breaker: CircuitBreaker::new("yahoo", 5, Duration::from_secs(60)),
        }
    }

    async fn fetch_chart(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let now = calendar::now_ist();
        let period2 = now.timestamp();
        let period1 = (now - ChronoDuration::days(timeframe.window_days())).timestamp();

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let url = build_url_with_query(
            &url,
            &[
                ("interval", timeframe.to_yahoo_interval()),
                ("period1", period1.to_string().as_str()),
                ("period2", period2.to_string().as_str()),
                ("includePrePost", "false"),
            ],
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "tickcast/0.4")
            .send()
            .await
            .context("Failed to fetch chart from Yahoo")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo chart fetch failed ({}): {}", status, body);
        }

        let chart: ChartResponse = response
            .json()
            .await
            .context("Failed to parse Yahoo chart response")?;

        let result = chart
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Yahoo chart response empty for {}: {:?}",
                    symbol,
                    chart.chart.error
                )
            })?;

        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or_default();

        let fetch_tf = if timeframe == Timeframe::FourHour {
            Timeframe::OneHour
        } else {
            timeframe
        };

        let mut candles = Vec::with_capacity(result.timestamp.len());
        for (i, &ts) in result.timestamp.iter().enumerate() {
            let (Some(open), Some(high), Some(low), Some(close)) = (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) else {
                // Yahoo emits null rows for halts and thin minutes.
                continue;
            };
            if !(open.is_finite() && high.is_finite() && low.is_finite() && close.is_finite()) {
                continue;
            }
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);

            candles.push(Candle {
                symbol: symbol.to_string(),
                timeframe: fetch_tf,
                start_ts: ist_datetime(ts),
                open: Decimal::from_f64_retain(open).unwrap_or_default(),
                high: Decimal::from_f64_retain(high).unwrap_or_default(),
                low: Decimal::from_f64_retain(low).unwrap_or_default(),
                close: Decimal::from_f64_retain(close).unwrap_or_default(),
                volume: Decimal::from_f64_retain(volume).unwrap_or_default(),
            });
        }

        let candles = if timeframe == Timeframe::FourHour {
            aggregate_to_four_hour(candles)
        } else {
            candles
        };

        debug!("YahooProvider: {} bars for {} {}", candles.len(), symbol, timeframe);
        Ok(candles)
    }
}

/// Folds 1h bars onto the 4h grid (anchored at session open for NSE).
fn aggregate_to_four_hour(hourly: Vec<Candle>) -> Vec<Candle> {
    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();

    for bar in hourly {
        let bucket_start = Timeframe::FourHour.period_start(bar.start_ts);
        buckets
            .entry(bucket_start.timestamp())
            .and_modify(|agg| {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            })
            .or_insert(Candle {
                timeframe: Timeframe::FourHour,
                start_ts: bucket_start,
                ..bar
            });
    }

    buckets.into_values().collect()
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.breaker
            .call(self.fetch_chart(symbol, timeframe))
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => {
                    warn!("YahooProvider: breaker open, skipping {}", symbol);
                    anyhow::anyhow!(e.to_string())
                }
                BreakerError::Inner(inner) => inner,
            })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
