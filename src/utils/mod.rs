//! Shared numeric helpers and default constants

pub mod constants;

use nalgebra::DVector;

/// True when every component of `x` is finite
pub fn all_finite(x: &DVector<f64>) -> bool {
    x.iter().all(|v| v.is_finite())
}

/// Distance below which two times are the same up to rounding
pub fn time_slack(a: f64, b: f64) -> f64 {
    100.0 * f64::EPSILON * a.abs().max(b.abs())
}
