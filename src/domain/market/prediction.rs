use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;

/// One point of a forecast series. Forecast math runs in `f64`; candle
/// prices stay `Decimal` and are converted at the feature boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub ts: DateTime<FixedOffset>,
    pub price: f64,
}

/// Validation outcome for one bot's forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Sanitized,
    Rejected,
    Exception,
    Empty,
}

impl ValidationStatus {
    /// Whether a bot with this status stays in the merge.
    pub fn retained(&self) -> bool {
        matches!(self, ValidationStatus::Valid | ValidationStatus::Sanitized)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Sanitized => "sanitized",
            ValidationStatus::Rejected => "rejected",
            ValidationStatus::Exception => "exception",
            ValidationStatus::Empty => "empty",
        };
        write!(f, "{}", s)
    }
}

/// A retained bot's share of the merged forecast. Weights across retained
/// bots sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotContribution {
    pub bot_name: String,
    pub weight: f64,
    pub confidence: f64,
    pub validation_status: ValidationStatus,
    pub clipped_points: usize,
    pub meta: serde_json::Value,
}

/// Verbatim capture of what a bot produced, kept even for rejected bots so
/// the audit trail supports post-hoc analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRawOutput {
    pub bot_name: String,
    pub series: Vec<ForecastPoint>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-bot validation verdict recorded on the merged prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFlag {
    pub bot_name: String,
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Market context captured at emission time. `latest_close` is the
/// reference close anchoring magnitude validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub latest_close: f64,
    pub sma_20: f64,
    pub volatility_20: f64,
    pub volume_avg: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizationSummary {
    pub bots_sanitized: usize,
    pub total_clipped_points: usize,
    /// True when the merged series itself needed a post-merge re-clip.
    pub merged_reclipped: bool,
}

/// The Prediction Merger's output. Immutable once persisted; `id` is the
/// audit store's monotonic identifier (0 until saved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedPrediction {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub created_at: DateTime<FixedOffset>,
    pub horizon_minutes: u32,
    pub predicted_series: Vec<ForecastPoint>,
    pub overall_confidence: f64,
    pub bot_contributions: Vec<BotContribution>,
    pub bot_raw_outputs: Vec<BotRawOutput>,
    pub validation_flags: Vec<ValidationFlag>,
    pub feature_snapshot: FeatureSnapshot,
    pub sanitization_summary: SanitizationSummary,
}

/// Lifecycle of a training job. Only one non-terminal record may exist per
/// `(symbol, timeframe, bot_name)` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TrainingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStatus::Completed | TrainingStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Queued => "queued",
            TrainingStatus::Running => "running",
            TrainingStatus::Completed => "completed",
            TrainingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TrainingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TrainingStatus::Queued),
            "running" => Ok(TrainingStatus::Running),
            "completed" => Ok(TrainingStatus::Completed),
            "failed" => Ok(TrainingStatus::Failed),
            other => anyhow::bail!("Unknown training status: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bot_name: String,
    pub status: TrainingStatus,
    pub queued_at: DateTime<FixedOffset>,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub ended_at: Option<DateTime<FixedOffset>>,
    pub data_points: i64,
    pub metrics: serde_json::Value,
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accuracy metrics for a prediction whose horizon has elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: i64,
    pub prediction_id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub evaluated_at: DateTime<FixedOffset>,
    pub mae: f64,
    pub mape: f64,
    pub direction_accuracy: f64,
    pub points_compared: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_status_retention() {
        assert!(ValidationStatus::Valid.retained());
        assert!(ValidationStatus::Sanitized.retained());
        assert!(!ValidationStatus::Rejected.retained());
        assert!(!ValidationStatus::Exception.retained());
        assert!(!ValidationStatus::Empty.retained());
    }

    #[test]
    fn test_training_status_terminal() {
        assert!(!TrainingStatus::Queued.is_terminal());
        assert!(!TrainingStatus::Running.is_terminal());
        assert!(TrainingStatus::Completed.is_terminal());
        assert!(TrainingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ValidationStatus::Sanitized).unwrap(),
            "\"sanitized\""
        );
        assert_eq!(
            serde_json::to_string(&TrainingStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
