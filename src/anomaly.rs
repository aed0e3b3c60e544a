//! Interval-containment anomaly classification.
//!
//! A reading is anomalous when the actual value falls strictly outside the
//! predicted `[lower, upper]` interval. Bounds are inclusive.

use serde::Serialize;
use thiserror::Error;

/// Outcome of checking one reading against its predicted interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub is_anomaly: bool,
    /// Signed distance to the nearest violated bound; negative below, positive above, 0 inside
    pub deviation: f64,
}

impl Classification {
    pub const NORMAL: Classification = Classification {
        is_anomaly: false,
        deviation: 0.0,
    };
}

#[derive(Debug, Error, PartialEq)]
pub enum AnomalyError {
    #[error("model produced an inverted interval: lower bound {lower} exceeds upper bound {upper}")]
    InvertedInterval { lower: f64, upper: f64 },

    #[error("cannot classify non-finite values (actual={actual}, lower={lower}, upper={upper})")]
    NonFinite { actual: f64, lower: f64, upper: f64 },
}

/// Classifies `actual` against the interval `[lower, upper]`.
///
/// An interval with `lower > upper` is a data-integrity failure of the model
/// and is rejected instead of being classified.
pub fn classify(actual: f64, lower: f64, upper: f64) -> Result<Classification, AnomalyError> {
    if !(actual.is_finite() && lower.is_finite() && upper.is_finite()) {
        return Err(AnomalyError::NonFinite {
            actual,
            lower,
            upper,
        });
    }
    if lower > upper {
        return Err(AnomalyError::InvertedInterval { lower, upper });
    }

    let classification = if actual < lower {
        Classification {
            is_anomaly: true,
            deviation: actual - lower,
        }
    } else if actual > upper {
        Classification {
            is_anomaly: true,
            deviation: actual - upper,
        }
    } else {
        Classification::NORMAL
    };

    Ok(classification)
}
