pub mod candle_quality;
pub mod forecast_quality;

pub use candle_quality::{CandleFault, CandleQualityFilter};
pub use forecast_quality::{HardFault, hard_validate, magnitude_ok, sanitize};
