//! Step-size control
//!
//! A proportional-integral controller on the weighted error norm:
//!
//! ```text
//! dt_next = dt * clamp(safety * err^(-1/q) * err_prev^(beta/q), min_factor, max_factor)
//! ```
//!
//! with `q = order + 1`. A step is accepted iff `err <= 1`.

use serde::{Deserialize, Serialize};

use crate::state::IntegratorState;
use crate::utils::constants::{SOL_BETA, SOL_PI_BETA, SOL_SCALE_MAX, SOL_SCALE_MIN};
use crate::utils::time_slack;

/// PI controller gains and limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiController {
    /// Safety factor applied to every proposal
    pub safety: f64,
    /// Smallest allowed ratio `dt_next / dt`
    pub min_factor: f64,
    /// Largest allowed ratio `dt_next / dt`
    pub max_factor: f64,
    /// Integral gain on the previous error
    pub beta: f64,
}

impl Default for PiController {
    fn default() -> Self {
        Self {
            safety: SOL_BETA,
            min_factor: SOL_SCALE_MIN,
            max_factor: SOL_SCALE_MAX,
            beta: SOL_PI_BETA,
        }
    }
}

impl PiController {
    /// Controller without the integral term
    pub fn proportional() -> Self {
        Self {
            beta: 0.0,
            ..Self::default()
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.safety > 0.0
            && self.safety <= 1.0
            && self.min_factor > 0.0
            && self.min_factor <= 1.0
            && self.max_factor >= 1.0
            && self.beta >= 0.0
            && [self.safety, self.min_factor, self.max_factor, self.beta]
                .iter()
                .all(|v| v.is_finite())
    }

    /// Step-size ratio after an accepted step
    pub fn accept_factor(&self, err: f64, order: usize, prev_err: f64) -> f64 {
        let q = order as f64 + 1.0;
        if err <= 0.0 {
            return self.max_factor;
        }
        let factor = self.safety * err.powf(-1.0 / q) * prev_err.powf(self.beta / q);
        factor.clamp(self.min_factor, self.max_factor)
    }

    /// Step-size ratio after a rejected step, never above one
    pub fn reject_factor(&self, err: f64, order: usize) -> f64 {
        if !err.is_finite() {
            return self.min_factor;
        }
        let q = order as f64 + 1.0;
        (self.safety * err.powf(-1.0 / q)).clamp(self.min_factor, 1.0)
    }
}

/// Outcome of one controller decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecision {
    pub accept: bool,
    /// Magnitude of the next step size
    pub dt_next: f64,
}

/// PI controller bound to the configured step-size range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepController {
    pub pi: PiController,
    pub dt_min: f64,
    pub dt_max: f64,
}

impl StepController {
    pub fn new(pi: PiController, dt_min: f64, dt_max: f64) -> Self {
        Self { pi, dt_min, dt_max }
    }

    /// Clamp a step-size magnitude into `[dt_min, dt_max]`
    pub fn clamp(&self, dt: f64) -> f64 {
        dt.clamp(self.dt_min, self.dt_max)
    }

    /// Accept or reject the last attempt and propose the next step size
    pub fn decide(&self, err: f64, order: usize, state: &IntegratorState) -> StepDecision {
        self.decide_limited(err, order, state, f64::INFINITY)
    }

    /// Like [`StepController::decide`] with growth capped at `max_growth`
    pub fn decide_limited(
        &self,
        err: f64,
        order: usize,
        state: &IntegratorState,
        max_growth: f64,
    ) -> StepDecision {
        let dt = state.dt();
        if err.is_finite() && err <= 1.0 {
            let factor = self
                .pi
                .accept_factor(err, order, state.previous_error())
                .min(max_growth);
            StepDecision {
                accept: true,
                dt_next: self.clamp(dt * factor),
            }
        } else {
            let factor = self.pi.reject_factor(err, order);
            StepDecision {
                accept: false,
                dt_next: self.clamp(dt * factor),
            }
        }
    }
}

/// Signed step actually taken and the exact time it ends at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTarget {
    pub h: f64,
    pub t_new: f64,
    /// The step was shortened to land on a stop
    pub landed: bool,
}

/// Shorten a step of magnitude `dt` from `t` so it cannot overshoot `stop`
///
/// Landing steps end exactly at `stop`, never at `t + h` rounded. A step
/// that would stop within rounding distance of `stop` lands on it too.
pub fn land_on(t: f64, dt: f64, direction: f64, stop: f64) -> StepTarget {
    let remaining = direction * (stop - t);
    if remaining > 0.0 && dt + time_slack(t, stop) >= remaining {
        StepTarget {
            h: stop - t,
            t_new: stop,
            landed: true,
        }
    } else {
        StepTarget {
            h: direction * dt,
            t_new: t + direction * dt,
            landed: false,
        }
    }
}
