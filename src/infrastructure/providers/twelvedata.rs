//! Twelve Data time-series provider.
//!
//! The venue suffix maps to the `exchange` query parameter (`.NS` -> NSE,
//! `.BO` -> BSE). Twelve Data returns rows newest-first with string-encoded
//! prices and naive IST datetimes for Indian listings; rows are parsed,
//! stamped with the +05:30 offset and reversed into ascending order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::calendar;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::core::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::infrastructure::core::http_client_factory::{build_http_client, build_url_with_query};

pub struct TwelveDataProvider {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl TwelveDataProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url("https://api.twelvedata.com".to_string(), api_key, timeout)
    }

    pub fn with_base_url(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url,
            api_key,
            breaker: CircuitBreaker::new("twelvedata", 5, Duration::from_secs(60)),
        }
    }

    fn split_symbol(symbol: &str) -> (&str, &'static str) {
        if let Some(base) = symbol.strip_suffix(".NS") {
            (base, "NSE")
        } else if let Some(base) = symbol.strip_suffix(".BO") {
            (base, "BSE")
        } else {
            (symbol, "NSE")
        }
    }

    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let (base_symbol, exchange) = Self::split_symbol(symbol);
        let start = calendar::now_ist() - ChronoDuration::days(timeframe.window_days());
        let start_date = start.format("%Y-%m-%d %H:%M:%S").to_string();

        let url = format!("{}/time_series", self.base_url);
        let url = build_url_with_query(
            &url,
            &[
                ("symbol", base_symbol),
                ("exchange", exchange),
                ("interval", timeframe.to_twelvedata_interval()),
                ("start_date", start_date.as_str()),
                ("outputsize", "5000"),
                ("timezone", "Asia/Kolkata"),
                ("apikey", self.api_key.as_str()),
            ],
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch time series from Twelve Data")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Twelve Data fetch failed ({})", status);
        }

        let body: TimeSeriesResponse = response
            .json()
            .await
            .context("Failed to parse Twelve Data response")?;

        if let Some(status) = &body.status
            && status != "ok"
        {
            anyhow::bail!(
                "Twelve Data error for {}: {}",
                symbol,
                body.message.unwrap_or_default()
            );
        }

        let mut candles = Vec::with_capacity(body.values.len());
        for row in &body.values {
            let Some(candle) = row.to_candle(symbol, timeframe) else {
                continue;
            };
            candles.push(candle);
        }

        // Newest-first upstream; the gateway expects ascending.
        candles.reverse();

        debug!(
            "TwelveDataProvider: {} bars for {} {}",
            candles.len(),
            symbol,
            timeframe
        );
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    fn name(&self) -> &str {
        "twelvedata"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.breaker
            .call(self.fetch_series(symbol, timeframe))
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => {
                    warn!("TwelveDataProvider: breaker open, skipping {}", symbol);
                    anyhow::anyhow!(e.to_string())
                }
                BreakerError::Inner(inner) => inner,
            })
    }
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Vec<SeriesRow>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

impl SeriesRow {
    fn to_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        // Daily rows carry a bare date; intraday rows a full datetime.
        let naive = NaiveDateTime::parse_from_str(&self.datetime, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| {
                chrono::NaiveDate::parse_from_str(&self.datetime, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        let start_ts = naive.and_local_timezone(calendar::ist()).single()?;

        Some(Candle {
            symbol: symbol.to_string(),
            timeframe,
            start_ts,
            open: Decimal::from_str(&self.open).ok()?,
            high: Decimal::from_str(&self.high).ok()?,
            low: Decimal::from_str(&self.low).ok()?,
            close: Decimal::from_str(&self.close).ok()?,
            volume: self
                .volume
                .as_deref()
                .and_then(|v| Decimal::from_str(v).ok())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_splitting() {
        assert_eq!(TwelveDataProvider::split_symbol("INFY.NS"), ("INFY", "NSE"));
        assert_eq!(
            TwelveDataProvider::split_symbol("RELIANCE.BO"),
            ("RELIANCE", "BSE")
        );
    }

    #[test]
    fn test_row_parsing_intraday() {
        let row = SeriesRow {
            datetime: "2025-07-09 10:00:00".to_string(),
            open: "1500.5".to_string(),
            high: "1510".to_string(),
            low: "1495.25".to_string(),
            close: "1505".to_string(),
            volume: Some("12000".to_string()),
        };
        let candle = row.to_candle("INFY.NS", Timeframe::FiveMin).unwrap();
        assert_eq!(candle.open, dec!(1500.5));
        assert_eq!(candle.volume, dec!(12000));
        assert_eq!(candle.start_ts.offset().local_minus_utc(), 5 * 3600 + 1800);
    }

    #[test]
    fn test_row_parsing_daily_date_only() {
        let row = SeriesRow {
            datetime: "2025-07-09".to_string(),
            open: "1500".to_string(),
            high: "1510".to_string(),
            low: "1495".to_string(),
            close: "1505".to_string(),
            volume: None,
        };
        let candle = row.to_candle("INFY.NS", Timeframe::OneDay).unwrap();
        assert_eq!(candle.volume, Decimal::ZERO);
    }

    #[test]
    fn test_unparseable_row_skipped() {
        let row = SeriesRow {
            datetime: "garbage".to_string(),
            open: "1".to_string(),
            high: "1".to_string(),
            low: "1".to_string(),
            close: "1".to_string(),
            volume: None,
        };
        assert!(row.to_candle("INFY.NS", Timeframe::FiveMin).is_none());
    }
}
