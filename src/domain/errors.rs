use thiserror::Error;

/// Errors crossing the market-data boundary (providers, cache, gateway).
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("All providers exhausted for {symbol} {timeframe}")]
    ProviderExhausted { symbol: String, timeframe: String },

    #[error("Provider {provider} failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    #[error("Invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("Upstream timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Errors from the Prediction Merger.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("All bots rejected for {symbol} {timeframe}; nothing to merge")]
    AllBotsRejected { symbol: String, timeframe: String },

    #[error("No candle history for {symbol} {timeframe}")]
    NoHistory { symbol: String, timeframe: String },

    #[error("Merger deadline of {timeout_secs}s exceeded for {symbol}")]
    DeadlineExceeded { symbol: String, timeout_secs: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the training queue.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Training already queued for this (symbol, timeframe, bot): job {job_id}")]
    AlreadyQueued { job_id: i64 },

    #[error("Unknown bot: {name}")]
    UnknownBot { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
