//! Probabilistic-integration noise callbacks
//!
//! After every accepted step the state is perturbed by
//!
//! ```text
//! dx_i = xi_i * |h|^((p + 1) / 2) * sigma,    xi_i ~ N(0, 1)
//! ```
//!
//! where `p` is the order of the active method. The fixed variant uses a
//! user-supplied `sigma`; the adaptive variant scales the controller's error
//! norm of the step by a tunable constant instead. Repeated integrations with
//! different seeds then sample the uncertainty due to discretisation.
//!
//! This module requires the `rand-support` feature.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;

use super::base::AffectContext;
use super::discrete::DiscreteCallback;
use crate::error::IntegrationError;

/// Scale of the injected perturbation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseScale {
    /// Constant `sigma`
    Fixed(f64),
    /// `sigma = scale * err`, with `err` the weighted error norm of the step
    Adaptive(f64),
}

/// Wiener-consistent perturbation of the state after each step
#[derive(Debug, Clone)]
pub struct ProbIntsNoise {
    scale: NoiseScale,
    rng: StdRng,
}

impl ProbIntsNoise {
    /// Perturbation with a constant `sigma` and optional seed
    pub fn fixed(sigma: f64, seed: Option<u64>) -> Result<Self, IntegrationError> {
        Self::with_scale(NoiseScale::Fixed(sigma), seed)
    }

    /// Perturbation scaled by the step's own error estimate
    pub fn adaptive(scale: f64, seed: Option<u64>) -> Result<Self, IntegrationError> {
        Self::with_scale(NoiseScale::Adaptive(scale), seed)
    }

    fn with_scale(scale: NoiseScale, seed: Option<u64>) -> Result<Self, IntegrationError> {
        let value = match scale {
            NoiseScale::Fixed(v) | NoiseScale::Adaptive(v) => v,
        };
        if !(value.is_finite() && value >= 0.0) {
            return Err(IntegrationError::InvalidConfig(format!(
                "noise scale must be finite and non-negative, got {}",
                value
            )));
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self { scale, rng })
    }

    pub fn scale(&self) -> NoiseScale {
        self.scale
    }

    /// Reset with new seed
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Standard deviation of the increment for a step of size `h`
    pub fn increment_scale(&self, h: f64, order: usize, error: Option<f64>) -> f64 {
        let sigma = match self.scale {
            NoiseScale::Fixed(sigma) => sigma,
            NoiseScale::Adaptive(scale) => scale * error.unwrap_or(0.0),
        };
        h.abs().powf((order as f64 + 1.0) / 2.0) * sigma
    }

    /// Perturb the state held by `ctx`
    pub fn perturb(&mut self, ctx: &mut AffectContext<'_>) {
        let std = self.increment_scale(ctx.dt(), ctx.order(), ctx.error_estimate());
        if std == 0.0 || !std.is_finite() {
            return;
        }
        for v in ctx.perturb_state().iter_mut() {
            let xi: f64 = StandardNormal.sample(&mut self.rng);
            *v += std * xi;
        }
    }

    /// Discrete callback applying the perturbation after every step
    pub fn into_callback(mut self) -> DiscreteCallback {
        DiscreteCallback::always(move |ctx: &mut AffectContext<'_>| self.perturb(ctx))
    }
}
