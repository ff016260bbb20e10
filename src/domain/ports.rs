use anyhow::Result;
use async_trait::async_trait;

use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

/// One upstream market-data source.
///
/// Implementations translate the symbol and timeframe to their native form
/// and return provider-truthful candles: parsed and timezone-converted, but
/// not yet filtered. Normalization (invariant filtering, session checks,
/// out-of-order drops) is the gateway's job, so every provider is treated
/// uniformly. The history window is fixed per timeframe (`window_days`).
///
/// Adding a provider is a registration in the gateway's ordered list, not a
/// subclass.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>>;
}
