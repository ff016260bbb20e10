use chrono::Duration;
use tracing::warn;

use crate::domain::market::prediction::ForecastPoint;

/// Maximum allowed change between consecutive forecast points.
pub const MAX_STEP_CHANGE: f64 = 0.03;
/// Maximum allowed deviation of any point from the reference close.
pub const MAX_DRIFT: f64 = 0.10;
/// Absolute band around the reference close.
pub const BAND_LOW: f64 = 0.85;
pub const BAND_HIGH: f64 = 1.15;

/// Hard-validation failures; any of these rejects the series outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardFault {
    Empty,
    NonFinitePrice,
    NonPositivePrice,
    NotAscending,
    SpacingTooWide,
    HorizonTooShort,
}

impl std::fmt::Display for HardFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HardFault::Empty => "series is empty",
            HardFault::NonFinitePrice => "non-finite price",
            HardFault::NonPositivePrice => "non-positive price",
            HardFault::NotAscending => "timestamps not strictly ascending",
            HardFault::SpacingTooWide => "spacing exceeds one minute",
            HardFault::HorizonTooShort => "series does not cover the horizon",
        };
        write!(f, "{}", s)
    }
}

/// Point-wise structural validation of a forecast series.
///
/// The series must be non-empty, finite and positive throughout, strictly
/// ascending with at most one-minute spacing, and must span at least the
/// declared horizon minus one grid step.
pub fn hard_validate(series: &[ForecastPoint], horizon_minutes: u32) -> Result<(), HardFault> {
    if series.is_empty() {
        return Err(HardFault::Empty);
    }

    for point in series {
        if !point.price.is_finite() {
            return Err(HardFault::NonFinitePrice);
        }
        if point.price <= 0.0 {
            return Err(HardFault::NonPositivePrice);
        }
    }

    for pair in series.windows(2) {
        let gap = pair[1].ts - pair[0].ts;
        if gap <= Duration::zero() {
            return Err(HardFault::NotAscending);
        }
        if gap > Duration::minutes(1) {
            return Err(HardFault::SpacingTooWide);
        }
    }

    let span = series[series.len() - 1].ts - series[0].ts;
    if span < Duration::minutes(horizon_minutes as i64 - 1) {
        return Err(HardFault::HorizonTooShort);
    }

    Ok(())
}

/// Checks the magnitude constraints relative to the reference close:
/// per-step change, cumulative drift from the reference, and the absolute
/// band. Non-mutating; callers decide between rejection and sanitization.
pub fn magnitude_ok(series: &[ForecastPoint], reference_close: f64) -> bool {
    let mut prev = reference_close;
    for point in series {
        if (point.price - prev).abs() / prev > MAX_STEP_CHANGE + f64::EPSILON {
            return false;
        }
        if (point.price - reference_close).abs() / reference_close > MAX_DRIFT + f64::EPSILON {
            return false;
        }
        if point.price < reference_close * BAND_LOW || point.price > reference_close * BAND_HIGH {
            return false;
        }
        prev = point.price;
    }
    true
}

/// Clamps every out-of-bound point to the nearest bound and returns the
/// sanitized series with the clipped-point count.
///
/// Bounds are evaluated against the previously *sanitized* point, so a
/// runaway series is pulled back step by step instead of compounding.
pub fn sanitize(series: &[ForecastPoint], reference_close: f64) -> (Vec<ForecastPoint>, usize) {
    let mut clipped = 0usize;
    let mut prev = reference_close;
    let mut out = Vec::with_capacity(series.len());

    for point in series {
        let lower = (prev * (1.0 - MAX_STEP_CHANGE))
            .max(reference_close * (1.0 - MAX_DRIFT))
            .max(reference_close * BAND_LOW);
        let upper = (prev * (1.0 + MAX_STEP_CHANGE))
            .min(reference_close * (1.0 + MAX_DRIFT))
            .min(reference_close * BAND_HIGH);

        let price = point.price.clamp(lower, upper);
        if (price - point.price).abs() > f64::EPSILON {
            clipped += 1;
        }
        out.push(ForecastPoint {
            ts: point.ts,
            price,
        });
        prev = price;
    }

    if clipped > 0 {
        warn!(
            "Sanitized forecast series: clipped {} of {} points (reference close {})",
            clipped,
            series.len(),
            reference_close
        );
    }

    (out, clipped)
}
