//! Weighted error norms for step acceptance

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Absolute or relative tolerance, scalar or per component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tolerance {
    Scalar(f64),
    PerComponent(Vec<f64>),
}

impl Tolerance {
    /// Tolerance for component `i`
    ///
    /// Per-component tolerances shorter than the state reuse their last entry.
    pub fn get(&self, i: usize) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::PerComponent(v) => v.get(i).or(v.last()).copied().unwrap_or(0.0),
        }
    }

    pub(crate) fn is_valid(&self, dim: usize) -> bool {
        match self {
            Tolerance::Scalar(v) => v.is_finite() && *v >= 0.0,
            Tolerance::PerComponent(v) => {
                v.len() == dim && v.iter().all(|x| x.is_finite() && *x >= 0.0)
            }
        }
    }
}

impl From<f64> for Tolerance {
    fn from(v: f64) -> Self {
        Tolerance::Scalar(v)
    }
}

impl From<Vec<f64>> for Tolerance {
    fn from(v: Vec<f64>) -> Self {
        Tolerance::PerComponent(v)
    }
}

/// Reduction applied to the scaled error components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorNorm {
    /// Root mean square (Hairer)
    #[default]
    Rms,
    /// Maximum component
    Max,
}

/// Tolerance-weighted norm
///
/// Each component of `err` is divided by `abstol_i + reltol_i * max(|x0_i|, |x1_i|)`
/// so that a result `<= 1` means the error is within tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedNorm {
    pub abstol: Tolerance,
    pub reltol: Tolerance,
    pub kind: ErrorNorm,
}

impl WeightedNorm {
    pub fn new(abstol: Tolerance, reltol: Tolerance, kind: ErrorNorm) -> Self {
        Self {
            abstol,
            reltol,
            kind,
        }
    }

    /// Scaled norm of `err` relative to the states bracketing the step
    pub fn norm(&self, err: &DVector<f64>, x0: &DVector<f64>, x1: &DVector<f64>) -> f64 {
        let n = err.len();
        if n == 0 {
            return 0.0;
        }
        let scaled = (0..n).map(|i| {
            let sk = self.abstol.get(i) + self.reltol.get(i) * x0[i].abs().max(x1[i].abs());
            err[i] / sk.max(f64::MIN_POSITIVE)
        });

        match self.kind {
            ErrorNorm::Rms => (scaled.map(|e| e * e).sum::<f64>() / n as f64).sqrt(),
            ErrorNorm::Max => scaled.map(f64::abs).fold(0.0, f64::max),
        }
    }
}
