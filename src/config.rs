use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Topic;

/// Upstream market-data providers the gateway can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Yahoo,
    TwelveData,
    Mock,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" => Ok(ProviderKind::Yahoo),
            "twelvedata" => Ok(ProviderKind::TwelveData),
            "mock" => Ok(ProviderKind::Mock),
            _ => anyhow::bail!(
                "Invalid provider: {}. Must be 'yahoo', 'twelvedata' or 'mock'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub artifact_dir: PathBuf,
    // Provider Gateway
    pub primary_provider: ProviderKind,
    pub fallback_providers: Vec<ProviderKind>,
    pub twelvedata_api_key: String,
    pub provider_timeout_seconds: u64,
    // Cache Tier
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub hot_cache_url: Option<String>,
    // Scheduler
    pub scheduler_realtime_interval_seconds: u64,
    pub scheduler_prediction_interval_seconds: u64,
    pub max_instances_per_job: usize,
    pub misfire_grace_seconds: u64,
    // Merger
    pub bot_predict_timeout_seconds: u64,
    pub merger_timeout_seconds: u64,
    pub default_horizon_minutes: u32,
    // Candle / Audit store
    pub db_pool_size: u32,
    pub db_pool_overflow: u32,
    pub db_connection_ttl_seconds: u64,
    // Subscription Fabric
    pub subscription_queue_depth: usize,
    pub heartbeat_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    // Training
    pub training_parallelism: usize,
    // Default watch list, always in the scheduler's active set.
    pub watchlist: Vec<Topic>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

/// Watchlist format: comma-separated `SYMBOL:timeframe` pairs,
/// e.g. `INFY.NS:5m,TCS.NS:15m`.
fn parse_watchlist(raw: &str) -> Result<Vec<Topic>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (symbol, timeframe) = entry
                .rsplit_once(':')
                .with_context(|| format!("Watchlist entry '{}' is not SYMBOL:timeframe", entry))?;
            Ok(Topic::new(symbol, Timeframe::from_str(timeframe)?))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let primary_provider =
            ProviderKind::from_str(&env::var("TICKCAST_PRIMARY_PROVIDER").unwrap_or_else(|_| "yahoo".to_string()))?;

        let fallback_providers = env::var("TICKCAST_FALLBACK_PROVIDERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ProviderKind::from_str)
            .collect::<Result<Vec<_>>>()?;

        let watchlist = parse_watchlist(
            &env::var("TICKCAST_WATCHLIST").unwrap_or_else(|_| "INFY.NS:5m".to_string()),
        )?;

        let hot_cache_url = env::var("TICKCAST_HOT_CACHE_URL").ok().filter(|s| !s.is_empty());

        let training_parallelism: usize = env_or("TICKCAST_TRAINING_PARALLELISM", 1)?;
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if training_parallelism > cpu_count {
            anyhow::bail!(
                "TICKCAST_TRAINING_PARALLELISM {} exceeds CPU count {}",
                training_parallelism,
                cpu_count
            );
        }

        Ok(Self {
            bind_addr: env::var("TICKCAST_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: env::var("TICKCAST_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tickcast.db".to_string()),
            artifact_dir: PathBuf::from(
                env::var("TICKCAST_ARTIFACT_DIR").unwrap_or_else(|_| "data/artifacts".to_string()),
            ),
            primary_provider,
            fallback_providers,
            twelvedata_api_key: env::var("TWELVEDATA_API_KEY").unwrap_or_default(),
            provider_timeout_seconds: env_or("TICKCAST_PROVIDER_TIMEOUT_SECONDS", 10)?,
            cache_ttl_seconds: env_or("TICKCAST_CACHE_TTL_SECONDS", 30)?,
            cache_max_entries: env_or("TICKCAST_CACHE_MAX_ENTRIES", 1024)?,
            hot_cache_url,
            scheduler_realtime_interval_seconds: env_or("TICKCAST_REALTIME_INTERVAL_SECONDS", 5)?,
            scheduler_prediction_interval_seconds: env_or(
                "TICKCAST_PREDICTION_INTERVAL_SECONDS",
                300,
            )?,
            max_instances_per_job: env_or("TICKCAST_MAX_INSTANCES_PER_JOB", 3)?,
            misfire_grace_seconds: env_or("TICKCAST_MISFIRE_GRACE_SECONDS", 10)?,
            bot_predict_timeout_seconds: env_or("TICKCAST_BOT_PREDICT_TIMEOUT_SECONDS", 8)?,
            merger_timeout_seconds: env_or("TICKCAST_MERGER_TIMEOUT_SECONDS", 30)?,
            default_horizon_minutes: env_or("TICKCAST_DEFAULT_HORIZON_MINUTES", 180)?,
            db_pool_size: env_or("TICKCAST_DB_POOL_SIZE", 20)?,
            db_pool_overflow: env_or("TICKCAST_DB_POOL_OVERFLOW", 40)?,
            db_connection_ttl_seconds: env_or("TICKCAST_DB_CONNECTION_TTL_SECONDS", 3600)?,
            subscription_queue_depth: env_or("TICKCAST_SUBSCRIPTION_QUEUE_DEPTH", 64)?,
            heartbeat_seconds: env_or("TICKCAST_HEARTBEAT_SECONDS", 30)?,
            heartbeat_timeout_seconds: env_or("TICKCAST_HEARTBEAT_TIMEOUT_SECONDS", 60)?,
            training_parallelism,
            watchlist,
        })
    }

    /// Ordered provider list: primary first, then fallbacks, deduplicated.
    pub fn provider_order(&self) -> Vec<ProviderKind> {
        let mut order = vec![self.primary_provider];
        for kind in &self.fallback_providers {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::from_str("yahoo").unwrap(), ProviderKind::Yahoo);
        assert_eq!(
            ProviderKind::from_str("TwelveData").unwrap(),
            ProviderKind::TwelveData
        );
        assert!(ProviderKind::from_str("bloomberg").is_err());
    }

    #[test]
    fn test_watchlist_parsing() {
        let topics = parse_watchlist("INFY.NS:5m, TCS.NS:15m").unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0], Topic::new("INFY.NS", Timeframe::FiveMin));
        assert_eq!(topics[1], Topic::new("TCS.NS", Timeframe::FifteenMin));
        assert!(parse_watchlist("INFY.NS").is_err());
        assert!(parse_watchlist("").unwrap().is_empty());
    }

    #[test]
    fn test_provider_order_dedupes() {
        let config = Config {
            bind_addr: String::new(),
            database_url: String::new(),
            artifact_dir: PathBuf::new(),
            primary_provider: ProviderKind::Yahoo,
            fallback_providers: vec![ProviderKind::TwelveData, ProviderKind::Yahoo],
            twelvedata_api_key: String::new(),
            provider_timeout_seconds: 10,
            cache_ttl_seconds: 30,
            cache_max_entries: 1024,
            hot_cache_url: None,
            scheduler_realtime_interval_seconds: 5,
            scheduler_prediction_interval_seconds: 300,
            max_instances_per_job: 3,
            misfire_grace_seconds: 10,
            bot_predict_timeout_seconds: 8,
            merger_timeout_seconds: 30,
            default_horizon_minutes: 180,
            db_pool_size: 20,
            db_pool_overflow: 40,
            db_connection_ttl_seconds: 3600,
            subscription_queue_depth: 64,
            heartbeat_seconds: 30,
            heartbeat_timeout_seconds: 60,
            training_parallelism: 1,
            watchlist: vec![],
        };
        assert_eq!(
            config.provider_order(),
            vec![ProviderKind::Yahoo, ProviderKind::TwelveData]
        );
    }
}
