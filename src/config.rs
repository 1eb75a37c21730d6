//! Integrator configuration
//!
//! [`IntegratorConfig`] is an immutable record handed to the integrator at
//! construction. It derives `serde` so it can be loaded from any format; every
//! field has a default and missing fields fall back to it.

use serde::{Deserialize, Serialize};

use crate::controller::PiController;
use crate::error::IntegrationError;
use crate::norm::{ErrorNorm, Tolerance, WeightedNorm};
use crate::problem::OdeProblem;
use crate::solvers::{AlgorithmDescriptor, Newton};
use crate::utils::constants::{
    NEWTON_ITERATIONS_MAX, NEWTON_TOLERANCE, SIM_REJECTIONS_MAX, SIM_STEPS_MAX,
    SIM_TIMESTEP_MAX, SIM_TIMESTEP_MIN, SOL_TOLERANCE_LTE_ABS, SOL_TOLERANCE_LTE_REL,
};

/// Source of the Jacobian used by implicit steppers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JacobianMode {
    /// Analytic when the system provides one, finite differences otherwise
    #[default]
    Auto,
    /// Always the system's analytic Jacobian
    Analytic,
    /// Always forward finite differences
    FiniteDifference,
}

/// Configuration record of one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub abstol: Tolerance,
    pub reltol: Tolerance,
    pub norm: ErrorNorm,

    /// Initial step size; estimated from the problem when `None`
    pub dt_initial: Option<f64>,
    pub dt_min: f64,
    pub dt_max: f64,

    /// Consecutive rejections of one step before giving up
    pub max_rejections: usize,
    /// Accepted steps before giving up
    pub max_steps: usize,

    /// Fixed-step mode when `false`; `dt_initial` is then the step size
    pub adaptive: bool,

    /// Save every accepted step (ignored when `saveat` is non-empty)
    pub save_everystep: bool,
    pub save_start: bool,
    pub save_end: bool,
    /// Times at which the dense output is sampled into the saved trajectory
    pub saveat: Vec<f64>,
    /// Keep the interpolants of every accepted step
    pub dense: bool,

    /// Times every step must land on exactly
    pub tstops: Vec<f64>,

    pub controller: PiController,

    pub jacobian: JacobianMode,
    pub newton_tol: f64,
    pub newton_max_iterations: usize,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            abstol: Tolerance::Scalar(SOL_TOLERANCE_LTE_ABS),
            reltol: Tolerance::Scalar(SOL_TOLERANCE_LTE_REL),
            norm: ErrorNorm::Rms,
            dt_initial: None,
            dt_min: SIM_TIMESTEP_MIN,
            dt_max: SIM_TIMESTEP_MAX,
            max_rejections: SIM_REJECTIONS_MAX,
            max_steps: SIM_STEPS_MAX,
            adaptive: true,
            save_everystep: true,
            save_start: true,
            save_end: true,
            saveat: Vec::new(),
            dense: true,
            tstops: Vec::new(),
            controller: PiController::default(),
            jacobian: JacobianMode::Auto,
            newton_tol: NEWTON_TOLERANCE,
            newton_max_iterations: NEWTON_ITERATIONS_MAX,
        }
    }
}

impl IntegratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed-step configuration with step size `dt`
    pub fn fixed_step(dt: f64) -> Self {
        Self {
            adaptive: false,
            dt_initial: Some(dt),
            ..Self::default()
        }
    }

    pub fn with_abstol(mut self, abstol: impl Into<Tolerance>) -> Self {
        self.abstol = abstol.into();
        self
    }

    pub fn with_reltol(mut self, reltol: impl Into<Tolerance>) -> Self {
        self.reltol = reltol.into();
        self
    }

    /// Set both tolerances at once
    pub fn with_tolerances(self, abstol: impl Into<Tolerance>, reltol: impl Into<Tolerance>) -> Self {
        self.with_abstol(abstol).with_reltol(reltol)
    }

    pub fn with_norm(mut self, norm: ErrorNorm) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_dt_initial(mut self, dt: f64) -> Self {
        self.dt_initial = Some(dt);
        self
    }

    pub fn with_dt_min(mut self, dt: f64) -> Self {
        self.dt_min = dt;
        self
    }

    pub fn with_dt_max(mut self, dt: f64) -> Self {
        self.dt_max = dt;
        self
    }

    pub fn with_max_rejections(mut self, n: usize) -> Self {
        self.max_rejections = n;
        self
    }

    pub fn with_max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_save_everystep(mut self, save: bool) -> Self {
        self.save_everystep = save;
        self
    }

    pub fn with_save_start(mut self, save: bool) -> Self {
        self.save_start = save;
        self
    }

    pub fn with_save_end(mut self, save: bool) -> Self {
        self.save_end = save;
        self
    }

    pub fn with_saveat(mut self, times: Vec<f64>) -> Self {
        self.saveat = times;
        self
    }

    pub fn with_dense(mut self, dense: bool) -> Self {
        self.dense = dense;
        self
    }

    pub fn with_tstops(mut self, times: Vec<f64>) -> Self {
        self.tstops = times;
        self
    }

    pub fn with_controller(mut self, controller: PiController) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_jacobian(mut self, mode: JacobianMode) -> Self {
        self.jacobian = mode;
        self
    }

    pub fn with_newton(mut self, tolerance: f64, max_iterations: usize) -> Self {
        self.newton_tol = tolerance;
        self.newton_max_iterations = max_iterations;
        self
    }

    /// Error norm built from the tolerances
    pub fn weighted_norm(&self) -> WeightedNorm {
        WeightedNorm::new(self.abstol.clone(), self.reltol.clone(), self.norm)
    }

    /// Default nonlinear solver built from the Newton settings
    pub fn newton(&self) -> Newton {
        Newton::new(self.newton_tol, self.newton_max_iterations)
    }

    /// Check the record against a problem and the algorithms that will run it
    pub fn validate(
        &self,
        problem: &OdeProblem,
        algorithms: &[AlgorithmDescriptor],
    ) -> Result<(), IntegrationError> {
        let invalid = |msg: String| Err(IntegrationError::InvalidConfig(msg));
        let dim = problem.dim();

        if !self.abstol.is_valid(dim) {
            return invalid(format!("abstol {:?} is not valid for dimension {}", self.abstol, dim));
        }
        if !self.reltol.is_valid(dim) {
            return invalid(format!("reltol {:?} is not valid for dimension {}", self.reltol, dim));
        }
        if (0..dim).any(|i| self.abstol.get(i) + self.reltol.get(i) <= 0.0) {
            return invalid("abstol and reltol are both zero for some component".to_string());
        }

        if !(self.dt_min > 0.0 && self.dt_min.is_finite()) {
            return invalid(format!("dt_min must be positive, got {}", self.dt_min));
        }
        if self.dt_min > self.dt_max {
            return invalid(format!("dt_min {} exceeds dt_max {}", self.dt_min, self.dt_max));
        }
        if let Some(dt) = self.dt_initial {
            if !(dt > 0.0 && dt.is_finite()) {
                return invalid(format!("dt_initial must be positive, got {}", dt));
            }
        }
        if !self.adaptive && self.dt_initial.is_none() {
            return invalid("fixed-step mode requires dt_initial".to_string());
        }

        if self.max_rejections == 0 {
            return invalid("max_rejections must be at least 1".to_string());
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be at least 1".to_string());
        }
        if !self.controller.is_valid() {
            return invalid(format!("controller {:?} is not valid", self.controller));
        }
        if !(self.newton_tol > 0.0) || self.newton_max_iterations == 0 {
            return invalid("Newton tolerance and iteration budget must be positive".to_string());
        }

        let (t0, tf) = problem.t_span();
        if !(t0.is_finite() && tf.is_finite()) {
            return invalid(format!("time span ({}, {}) is not finite", t0, tf));
        }
        if problem.initial().iter().any(|v| !v.is_finite()) {
            return invalid("initial state is not finite".to_string());
        }
        let (lo, hi) = if t0 <= tf { (t0, tf) } else { (tf, t0) };
        let outside = |t: &f64| !(lo..=hi).contains(t);
        if let Some(t) = self.saveat.iter().find(|t| outside(t)) {
            return invalid(format!("saveat time {} lies outside [{}, {}]", t, lo, hi));
        }
        if let Some(t) = self.tstops.iter().find(|t| outside(t)) {
            return invalid(format!("tstop {} lies outside [{}, {}]", t, lo, hi));
        }

        let system = problem.system();
        if self.jacobian == JacobianMode::Analytic
            && !system.has_jacobian()
            && algorithms.iter().any(|alg| alg.requires_linear_solver())
        {
            return Err(IntegrationError::MissingJacobian);
        }
        if system.mass_matrix().is_some() {
            if let Some(alg) = algorithms.iter().find(|alg| !alg.supports_mass_matrix()) {
                return invalid(format!("{} cannot integrate a system with a mass matrix", alg));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::{RKDP54, RODAS4};
    use nalgebra::{DMatrix, DVector};

    fn problem() -> OdeProblem {
        OdeProblem::from_fn(|x, _| -x, DVector::from_vec(vec![1.0, 2.0]), (0.0, 1.0))
    }

    #[test]
    fn test_default_is_valid() {
        assert!(IntegratorConfig::default().validate(&problem(), &[RKDP54]).is_ok());
        assert!(IntegratorConfig::fixed_step(0.1).validate(&problem(), &[RKDP54]).is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_records() {
        let p = problem();
        let bad = [
            IntegratorConfig::new().with_abstol(-1.0),
            IntegratorConfig::new().with_reltol(vec![1e-3]),
            IntegratorConfig::new().with_tolerances(0.0, 0.0),
            IntegratorConfig::new().with_dt_min(1.0).with_dt_max(0.1),
            IntegratorConfig::new().with_adaptive(false),
            IntegratorConfig::new().with_max_rejections(0),
            IntegratorConfig::new().with_saveat(vec![0.5, 1.5]),
            IntegratorConfig::new().with_tstops(vec![-0.1]),
        ];
        for cfg in bad {
            assert!(
                matches!(cfg.validate(&p, &[RKDP54]), Err(IntegrationError::InvalidConfig(_))),
                "{:?} should be rejected",
                cfg
            );
        }
    }

    #[test]
    fn test_jacobian_and_mass_matrix_checks() {
        let p = problem();
        let cfg = IntegratorConfig::new().with_jacobian(JacobianMode::Analytic);
        assert_eq!(cfg.validate(&p, &[RODAS4]), Err(IntegrationError::MissingJacobian));
        // Explicit methods never ask for a Jacobian
        assert!(cfg.validate(&p, &[RKDP54]).is_ok());

        let sys = crate::problem::FnSystem::new(|x: &DVector<f64>, _t| -x)
            .with_mass_matrix(DMatrix::identity(1, 1));
        let p = OdeProblem::new(sys, DVector::from_vec(vec![1.0]), (0.0, 1.0));
        let cfg = IntegratorConfig::new();
        assert!(cfg.validate(&p, &[RODAS4]).is_ok());
        assert!(matches!(
            cfg.validate(&p, &[RODAS4, RKDP54]),
            Err(IntegrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reverse_span_bounds() {
        let p = OdeProblem::from_fn(|x, _| -x, DVector::from_vec(vec![1.0]), (1.0, 0.0));
        let cfg = IntegratorConfig::new().with_saveat(vec![0.25, 0.75]);
        assert!(cfg.validate(&p, &[RKDP54]).is_ok());
    }
}
