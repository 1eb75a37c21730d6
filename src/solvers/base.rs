//! Base stepper trait and types

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::descriptor::AlgorithmDescriptor;
use super::linear::{Factorization, LinearSolver};
use super::nonlinear::NonlinearSolver;
use crate::config::JacobianMode;
use crate::dense::InterpolationData;
use crate::norm::WeightedNorm;
use crate::problem::OdeSystem;
use crate::solution::Stats;
use crate::state::IntegratorState;
use crate::utils::all_finite;

/// Stepper-level errors
///
/// All of these are recoverable: the engine rejects the attempt, shrinks the
/// step and retries from the same start state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Right-hand side produced non-finite values near t = {t}")]
    Domain { t: f64 },

    #[error("Iteration matrix is singular")]
    SingularMatrix,

    #[error("Nonlinear solve did not converge after {iterations} iterations")]
    NonlinearConvergence { iterations: usize },

    #[error("Multistep history holds {available} points, order {order} needs {required}")]
    InsufficientHistory {
        order: usize,
        available: usize,
        required: usize,
    },

    #[error("Analytic Jacobian requested but the system provides none")]
    MissingJacobian,
}

/// Candidate step produced by one attempt
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Candidate state at `t + h`
    pub x_new: DVector<f64>,
    /// Local error estimate, `None` for methods without one
    pub error: Option<DVector<f64>>,
    /// Weighted norm of `error`, zero when there is no estimate
    pub error_norm: f64,
    /// Stage derivatives (or stage increments for Rosenbrock methods)
    pub stages: Vec<DVector<f64>>,
    /// Derivative at `x_new` when the method computed it for free
    pub f_new: Option<DVector<f64>>,
    /// Extra data needed by the dense output of this step
    pub interpolation: InterpolationData,
    /// Estimate of `|h| * L` for the dominant eigenvalue, if the method has one
    pub stiffness: Option<f64>,
}

impl StepResult {
    pub fn has_error_estimate(&self) -> bool {
        self.error.is_some()
    }
}

/// Core stepper trait
///
/// A stepper applies one algorithm to a single step. It never touches the
/// engine state; all feedback flows through [`StepResult`] and
/// [`Stepper::accept`].
pub trait Stepper: Send {
    /// Static description of the method
    fn descriptor(&self) -> AlgorithmDescriptor;

    /// Order of the propagated solution (current order for multistep methods)
    fn order(&self) -> usize;

    /// Order used by the step-size controller
    fn error_order(&self) -> usize {
        self.order()
    }

    /// Does the method produce an error estimate?
    fn is_adaptive(&self) -> bool;

    /// Does the method depend on accepted-step history?
    fn is_multistep(&self) -> bool {
        false
    }

    /// Largest factor by which the step may grow after an accepted step
    fn max_growth(&self) -> f64 {
        f64::INFINITY
    }

    /// Attempt a step of signed size `h` from the current engine state
    fn attempt_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        state: &IntegratorState,
        h: f64,
    ) -> Result<StepResult, SolverError>;

    /// Notify the stepper that a step ending at `(t, x)` was accepted
    fn accept(&mut self, t: f64, x: &DVector<f64>, h: f64) {
        let _ = (t, x, h);
    }

    /// Drop any history carried across steps
    fn reset(&mut self) {}

    /// The current point `(t, x)` was nudged in place by a perturbation
    fn rebase(&mut self, t: f64, x: &DVector<f64>) {
        let _ = (t, x);
    }
}

/// Everything a stepper may consult while attempting a step
pub struct StepContext<'a> {
    pub system: &'a dyn OdeSystem,
    pub norm: &'a WeightedNorm,
    pub jacobian: JacobianMode,
    pub linear: &'a dyn LinearSolver,
    pub nonlinear: &'a dyn NonlinearSolver,
    pub stats: &'a mut Stats,
}

impl<'a> StepContext<'a> {
    /// Evaluate the right-hand side, counting the call
    pub fn rhs(&mut self, x: &DVector<f64>, t: f64) -> DVector<f64> {
        self.stats.nfev += 1;
        self.system.rhs(x, t)
    }

    /// Evaluate the right-hand side and reject non-finite results
    pub fn rhs_checked(&mut self, x: &DVector<f64>, t: f64) -> Result<DVector<f64>, SolverError> {
        let fx = self.rhs(x, t);
        if all_finite(&fx) {
            Ok(fx)
        } else {
            Err(SolverError::Domain { t })
        }
    }

    /// Jacobian `∂f/∂x` at `(x, t)`
    ///
    /// `fx` must be `f(x, t)`; it is reused by the finite-difference path.
    pub fn jacobian(
        &mut self,
        x: &DVector<f64>,
        t: f64,
        fx: &DVector<f64>,
    ) -> Result<DMatrix<f64>, SolverError> {
        let analytic = match self.jacobian {
            JacobianMode::FiniteDifference => None,
            JacobianMode::Auto => self.system.jacobian(x, t),
            JacobianMode::Analytic => Some(
                self.system
                    .jacobian(x, t)
                    .ok_or(SolverError::MissingJacobian)?,
            ),
        };

        self.stats.njac += 1;
        let jac = match analytic {
            Some(jac) => jac,
            None => self.fd_jacobian(x, t, fx),
        };

        if jac.iter().all(|v| v.is_finite()) {
            Ok(jac)
        } else {
            Err(SolverError::Domain { t })
        }
    }

    /// Forward-difference Jacobian, one extra evaluation per column
    fn fd_jacobian(&mut self, x: &DVector<f64>, t: f64, fx: &DVector<f64>) -> DMatrix<f64> {
        let n = x.len();
        let eps_sqrt = f64::EPSILON.sqrt();
        let mut jac = DMatrix::zeros(n, n);
        let mut x_pert = x.clone();

        for j in 0..n {
            let hj = eps_sqrt * x[j].abs().max(1.0);
            x_pert[j] = x[j] + hj;
            let f_pert = self.rhs(&x_pert, t);
            jac.set_column(j, &((f_pert - fx) / hj));
            x_pert[j] = x[j];
        }

        jac
    }

    /// Finite-difference `∂f/∂t`, zero for autonomous systems
    pub fn time_derivative(&mut self, x: &DVector<f64>, t: f64, fx: &DVector<f64>) -> DVector<f64> {
        if self.system.is_autonomous() {
            return DVector::zeros(x.len());
        }
        let dt = f64::EPSILON.sqrt() * t.abs().max(1.0);
        (self.rhs(x, t + dt) - fx) / dt
    }

    /// Factorise an iteration matrix, counting the factorisation
    pub fn factorize(&mut self, matrix: DMatrix<f64>) -> Result<Box<dyn Factorization>, SolverError> {
        self.stats.nfactor += 1;
        self.linear.factorize(matrix)
    }

    /// Solve with an existing factorisation, counting the solve
    pub fn solve(
        &mut self,
        factorization: &dyn Factorization,
        b: &DVector<f64>,
    ) -> Result<DVector<f64>, SolverError> {
        self.stats.nlinsolve += 1;
        factorization.solve(b)
    }

    /// Mass matrix times `v`, identity when the system has none
    pub fn mass_times(&self, v: &DVector<f64>) -> DVector<f64> {
        match self.system.mass_matrix() {
            Some(m) => m * v,
            None => v.clone(),
        }
    }

    /// Mass matrix as a dense matrix
    pub fn mass_matrix(&self, n: usize) -> DMatrix<f64> {
        match self.system.mass_matrix() {
            Some(m) => m.clone(),
            None => DMatrix::identity(n, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::norm::{ErrorNorm, Tolerance};
    use crate::problem::FnSystem;
    use crate::solvers::linear::DenseLu;
    use crate::solvers::nonlinear::Newton;
    use approx::assert_relative_eq;

    fn with_ctx<R>(sys: &FnSystem, mode: JacobianMode, f: impl FnOnce(&mut StepContext<'_>) -> R) -> (R, Stats) {
        let norm = WeightedNorm::new(Tolerance::Scalar(1e-6), Tolerance::Scalar(1e-6), ErrorNorm::Rms);
        let mut stats = Stats::default();
        let r = {
            let mut ctx = StepContext {
                system: sys,
                norm: &norm,
                jacobian: mode,
                linear: &DenseLu,
                nonlinear: &Newton::default(),
                stats: &mut stats,
            };
            f(&mut ctx)
        };
        (r, stats)
    }

    #[test]
    fn test_fd_jacobian_matches_analytic() {
        let sys = FnSystem::new(|x: &DVector<f64>, _t| {
            DVector::from_vec(vec![x[0] * x[1], x[0].sin()])
        });
        let x = DVector::from_vec(vec![0.3, 2.0]);
        let (jac, stats) = with_ctx(&sys, JacobianMode::Auto, |ctx| {
            let fx = ctx.rhs(&x, 0.0);
            ctx.jacobian(&x, 0.0, &fx).unwrap()
        });

        assert_relative_eq!(jac[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(0, 1)], 0.3, epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 0)], 0.3_f64.cos(), epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 1)], 0.0, epsilon = 1e-6);
        assert_eq!(stats.njac, 1);
        assert_eq!(stats.nfev, 3);
    }

    #[test]
    fn test_analytic_jacobian_required() {
        let sys = FnSystem::new(|x: &DVector<f64>, _t| -x);
        let x = DVector::from_vec(vec![1.0]);
        let (res, _) = with_ctx(&sys, JacobianMode::Analytic, |ctx| {
            let fx = ctx.rhs(&x, 0.0);
            ctx.jacobian(&x, 0.0, &fx)
        });
        assert_eq!(res.unwrap_err(), SolverError::MissingJacobian);
    }

    #[test]
    fn test_rhs_checked_flags_nan() {
        let sys = FnSystem::new(|x: &DVector<f64>, _t| x.map(|_| f64::NAN));
        let x = DVector::from_vec(vec![1.0]);
        let (res, stats) = with_ctx(&sys, JacobianMode::Auto, |ctx| ctx.rhs_checked(&x, 0.5));
        assert_eq!(res.unwrap_err(), SolverError::Domain { t: 0.5 });
        assert_eq!(stats.nfev, 1);
    }
}
