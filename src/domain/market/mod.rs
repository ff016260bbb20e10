pub mod prediction;
pub mod timeframe;
pub mod types;

pub use prediction::{
    BotContribution, BotRawOutput, Evaluation, FeatureSnapshot, ForecastPoint, MergedPrediction,
    SanitizationSummary, TrainingRecord, TrainingStatus, ValidationFlag, ValidationStatus,
};
pub use timeframe::Timeframe;
pub use types::{Candle, Topic};
