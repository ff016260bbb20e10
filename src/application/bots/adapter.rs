//! Adapter wrapping a concrete bot: artifact persistence, warm-up before
//! every prediction, and feature-shape reconciliation.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{BotForecast, FEATURE_DIM, ForecastBot, TrainOutcome};
use crate::domain::calendar;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::Candle;

/// On-disk model state, one file per `(bot, symbol, timeframe)` under a flat
/// directory. Opaque to everything but the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub bot_name: String,
    pub feature_dim: usize,
    pub params: serde_json::Value,
    pub trained_at: Option<DateTime<FixedOffset>>,
    pub data_points: usize,
}

impl ModelArtifact {
    fn fresh(bot: &dyn ForecastBot) -> Self {
        Self {
            bot_name: bot.name().to_string(),
            feature_dim: FEATURE_DIM,
            params: bot.default_params(),
            trained_at: None,
            data_points: 0,
        }
    }
}

pub struct BotAdapter {
    bot: Arc<dyn ForecastBot>,
    artifact_dir: PathBuf,
}

impl std::fmt::Debug for BotAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotAdapter")
            .field("bot", &self.bot.name())
            .field("artifact_dir", &self.artifact_dir)
            .finish()
    }
}

impl BotAdapter {
    pub fn new(bot: Arc<dyn ForecastBot>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            bot,
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.bot.name()
    }

    pub fn min_history(&self) -> usize {
        self.bot.min_history()
    }

    fn artifact_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        // Flat directory; symbols never contain path separators but the
        // replacement keeps hostile input from escaping it.
        let safe_symbol = symbol.replace(['/', '\\'], "_");
        self.artifact_dir
            .join(format!("{}_{}_{}.json", self.bot.name(), safe_symbol, timeframe))
    }

    fn load_artifact(&self, path: &Path) -> Option<ModelArtifact> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice::<ModelArtifact>(&bytes) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("BotAdapter[{}]: unreadable artifact {:?}: {}", self.name(), path, e);
                None
            }
        }
    }

    /// Atomic-rename publish: readers either see the old artifact or the new
    /// one, never a torn write.
    fn save_artifact(&self, path: &Path, artifact: &ModelArtifact) -> Result<(), String> {
        std::fs::create_dir_all(&self.artifact_dir)
            .map_err(|e| format!("artifact dir unwritable: {}", e))?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(artifact).map_err(|e| e.to_string())?;
        std::fs::write(&tmp, bytes).map_err(|e| format!("artifact write failed: {}", e))?;
        std::fs::rename(&tmp, path).map_err(|e| format!("artifact rename failed: {}", e))
    }

    /// Warm-up before every prediction: re-derives usable parameters from the
    /// stored artifact so stale optimizer state can never reject the call.
    /// Non-finite or missing values fall back to the bot's defaults.
    fn warm_up(&self, artifact: &ModelArtifact) -> serde_json::Value {
        let defaults = self.bot.default_params();
        let Some(stored) = artifact.params.as_object() else {
            return defaults;
        };
        let mut merged = defaults.as_object().cloned().unwrap_or_default();
        for (key, value) in stored {
            let usable = match value.as_f64() {
                Some(number) => number.is_finite(),
                None => value.is_u64() || value.is_i64(),
            };
            if usable {
                merged.insert(key.clone(), value.clone());
            }
        }
        serde_json::Value::Object(merged)
    }

    /// Runs one prediction. Handles the shape-mismatch path: an artifact
    /// declaring a different feature width is rebuilt fresh and this single
    /// call returns a low-confidence fallback.
    pub fn predict(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        horizon_minutes: u32,
    ) -> Result<BotForecast, String> {
        let path = self.artifact_path(symbol, timeframe);
        let artifact = self.load_artifact(&path);

        if let Some(ref loaded) = artifact
            && loaded.feature_dim != FEATURE_DIM
        {
            warn!(
                "BotAdapter[{}]: artifact feature shape {} != pipeline {}; rebuilding fresh",
                self.name(),
                loaded.feature_dim,
                FEATURE_DIM
            );
            let fresh = ModelArtifact::fresh(self.bot.as_ref());
            if let Err(e) = self.save_artifact(&path, &fresh) {
                warn!("BotAdapter[{}]: rebuild save failed: {}", self.name(), e);
            }
            let mut forecast =
                self.bot
                    .predict(candles, &fresh.params, horizon_minutes, timeframe)?;
            forecast.confidence = (forecast.confidence * 0.3).min(0.2);
            forecast.meta["shape_rebuilt"] = serde_json::Value::Bool(true);
            return Ok(forecast);
        }

        let artifact = artifact.unwrap_or_else(|| ModelArtifact::fresh(self.bot.as_ref()));
        let params = self.warm_up(&artifact);
        self.bot.predict(candles, &params, horizon_minutes, timeframe)
    }

    /// Runs one training pass and publishes the resulting artifact.
    pub fn train(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<TrainOutcome, String> {
        let outcome = self.bot.train(candles, config)?;

        let artifact = ModelArtifact {
            bot_name: self.bot.name().to_string(),
            feature_dim: FEATURE_DIM,
            params: outcome.params.clone(),
            trained_at: Some(calendar::now_ist()),
            data_points: outcome.data_points,
        };
        let path = self.artifact_path(symbol, timeframe);
        self.save_artifact(&path, &artifact)?;
        info!(
            "BotAdapter[{}]: trained on {} points for {} {}, artifact {:?}",
            self.name(),
            outcome.data_points,
            symbol,
            timeframe,
            path
        );
        Ok(outcome)
    }
}
