//! Nonlinear solver interface for fully implicit stages

use nalgebra::DVector;

use super::base::SolverError;
use super::linear::Factorization;
use crate::utils::constants::{NEWTON_ITERATIONS_MAX, NEWTON_TOLERANCE};

/// Residual function `R(y)` whose root is sought
pub type Residual<'a> = dyn FnMut(&DVector<f64>) -> Result<DVector<f64>, SolverError> + 'a;

/// Converged root with diagnostics
#[derive(Debug, Clone)]
pub struct NonlinearSolution {
    pub root: DVector<f64>,
    pub iterations: usize,
    /// Norm of the last correction
    pub residual: f64,
}

/// Solves `R(y) = 0` given a factorised approximation of `∂R/∂y`
pub trait NonlinearSolver: Send + Sync {
    fn solve_nonlinear(
        &self,
        residual: &mut Residual<'_>,
        matrix: &dyn Factorization,
        guess: DVector<f64>,
        norm: &dyn Fn(&DVector<f64>) -> f64,
    ) -> Result<NonlinearSolution, SolverError>;
}

/// Simplified Newton iteration with a frozen iteration matrix
///
/// Converges when the weighted norm of the correction drops below
/// `tolerance`; gives up early when successive corrections grow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Newton {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for Newton {
    fn default() -> Self {
        Self {
            tolerance: NEWTON_TOLERANCE,
            max_iterations: NEWTON_ITERATIONS_MAX,
        }
    }
}

impl Newton {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

impl NonlinearSolver for Newton {
    fn solve_nonlinear(
        &self,
        residual: &mut Residual<'_>,
        matrix: &dyn Factorization,
        guess: DVector<f64>,
        norm: &dyn Fn(&DVector<f64>) -> f64,
    ) -> Result<NonlinearSolution, SolverError> {
        let mut y = guess;
        let mut prev_correction = f64::INFINITY;

        for iteration in 1..=self.max_iterations {
            let r = residual(&y)?;
            let dy = matrix.solve(&r)?;
            y -= &dy;

            let correction = norm(&dy);
            if !correction.is_finite() {
                break;
            }
            if correction <= self.tolerance {
                return Ok(NonlinearSolution {
                    root: y,
                    iterations: iteration,
                    residual: correction,
                });
            }
            // Diverging
            if iteration > 1 && correction > 2.0 * prev_correction {
                return Err(SolverError::NonlinearConvergence {
                    iterations: iteration,
                });
            }
            prev_correction = correction;
        }

        Err(SolverError::NonlinearConvergence {
            iterations: self.max_iterations,
        })
    }
}
