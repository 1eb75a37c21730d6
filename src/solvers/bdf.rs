//! Variable-step Backward Differentiation Formulas
//!
//! For a `k`-th order BDF at the step to `t_{n+1}`:
//!
//! ```text
//! x_{n+1} = beta * h * f(x_{n+1}, t_{n+1}) + sum(alpha_j * x_{n-j}; j=0,...,k-1)
//! ```
//!
//! The coefficients are recomputed from the actual time grid every step, so
//! the method stays consistent under step-size changes. The nonlinear
//! equation is solved by Newton iteration on `M - beta*h*J`; a polynomial
//! predictor through the last `k+1` points provides both the initial guess
//! and the error estimate.
//!
//! # Startup Phase
//!
//! Without history the method falls back to backward Euler (BDF1) with an
//! explicit Euler predictor and raises its order by one per accepted step.
//!
//! # References
//!
//! - Gear, C. W. (1971). "Numerical Initial Value Problems in Ordinary
//!   Differential Equations". Prentice-Hall.
//! - Hairer, E., & Wanner, G. (1996). "Solving Ordinary Differential
//!   Equations II: Stiff and Differential-Algebraic Problems". Springer.

use nalgebra::{DMatrix, DVector};
use std::collections::VecDeque;

use super::base::{SolverError, StepContext, StepResult, Stepper};
use super::descriptor::AlgorithmDescriptor;
use crate::dense::InterpolationData;
use crate::state::IntegratorState;
use crate::utils::all_finite;

/// Largest supported BDF order
pub const BDF_MAX_ORDER: usize = 5;

/// Largest step growth between consecutive BDF steps
const BDF_MAX_GROWTH: f64 = 2.0;

/// Static description of a BDF family member
#[derive(Debug, PartialEq, Eq)]
pub struct BdfFamily {
    pub name: &'static str,
    pub max_order: usize,
}

pub const BDF1: BdfFamily = BdfFamily { name: "BDF1", max_order: 1 };
pub const BDF2: BdfFamily = BdfFamily { name: "BDF2", max_order: 2 };
pub const BDF3: BdfFamily = BdfFamily { name: "BDF3", max_order: 3 };
pub const BDF4: BdfFamily = BdfFamily { name: "BDF4", max_order: 4 };
pub const BDF5: BdfFamily = BdfFamily { name: "BDF5", max_order: 5 };

/// Compute BDF coefficients for variable timestep integration
///
/// # Arguments
/// * `order` - Order of the BDF method
/// * `timesteps` - Timestep buffer `(h_{n-j}; j=0,...,order-1)`, most recent
///   (the step being taken) first
///
/// # Returns
/// * `beta` - Weight for the function evaluation
/// * `alpha` - Weights for previous solutions, most recent first
pub fn compute_bdf_coefficients(
    order: usize,
    timesteps: &[f64],
) -> Result<(f64, Vec<f64>), SolverError> {
    if order == 0 || timesteps.len() < order {
        return Err(SolverError::InsufficientHistory {
            order,
            available: timesteps.len(),
            required: order,
        });
    }

    // Quit early for order 1 (backward Euler)
    if order == 1 {
        return Ok((1.0, vec![1.0]));
    }

    // Timestep ratios rho_j = h_{n-j} / h_n
    let h_n = timesteps[0];
    let rho: Vec<f64> = timesteps[1..order].iter().map(|&h| h / h_n).collect();

    // Normalised time of every point relative to the new one
    let mut theta = vec![-1.0; order + 1];
    theta[0] = 0.0;
    for j in 2..=order {
        let sum: f64 = rho[..j - 1].iter().sum();
        theta[j] -= sum;
    }

    // A[m, j] = theta_j^m, b = [0, 1, 0, ..., 0]
    let a_matrix = DMatrix::from_fn(order + 1, order + 1, |m, j| theta[j].powi(m as i32));
    let mut b_vec = DVector::zeros(order + 1);
    b_vec[1] = 1.0;

    let alphas = a_matrix
        .lu()
        .solve(&b_vec)
        .ok_or(SolverError::SingularMatrix)?;

    let beta = 1.0 / alphas[0];
    let alpha = alphas.iter().skip(1).map(|&a| -a / alphas[0]).collect();

    Ok((beta, alpha))
}

/// Value at `t` of the polynomial through `points`
fn extrapolate(points: &[(f64, &DVector<f64>)], t: f64) -> DVector<f64> {
    let mut out = DVector::zeros(points[0].1.len());
    for (j, (tj, xj)) in points.iter().enumerate() {
        let mut weight = 1.0;
        for (m, (tm, _)) in points.iter().enumerate() {
            if m != j {
                weight *= (t - tm) / (tj - tm);
            }
        }
        out.axpy(weight, xj, 1.0);
    }
    out
}

/// Variable-step BDF stepper of order up to `family.max_order`
#[derive(Debug, Clone)]
pub struct Bdf {
    family: &'static BdfFamily,
    /// Accepted points, most recent first
    history: VecDeque<(f64, DVector<f64>)>,
    order: usize,
}

impl Bdf {
    pub fn new(family: &'static BdfFamily) -> Self {
        Self {
            family,
            history: VecDeque::with_capacity(family.max_order + 1),
            order: 1,
        }
    }

    /// Number of stored points
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Make the history start at the engine's current point
    fn sync(&mut self, state: &IntegratorState) {
        let in_sync = matches!(
            self.history.front(),
            Some((t, x)) if *t == state.t() && x == state.x()
        );
        if !in_sync {
            self.history.clear();
            self.history.push_front((state.t(), state.x().clone()));
        }
    }
}

impl Stepper for Bdf {
    fn descriptor(&self) -> AlgorithmDescriptor {
        AlgorithmDescriptor::Bdf(self.family)
    }

    fn order(&self) -> usize {
        self.order
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn is_multistep(&self) -> bool {
        true
    }

    fn max_growth(&self) -> f64 {
        BDF_MAX_GROWTH
    }

    fn attempt_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        state: &IntegratorState,
        h: f64,
    ) -> Result<StepResult, SolverError> {
        self.sync(state);

        let n = state.x().len();
        let t0 = state.t();
        let t1 = t0 + h;
        let x0 = state.x();
        let f0 = state.derivative();

        // One order per stored point beyond the current one
        let k = self.family.max_order.min(self.history.len().max(2) - 1);
        self.order = k;

        let x_pred = if self.history.len() > k {
            let points: Vec<(f64, &DVector<f64>)> =
                self.history.iter().take(k + 1).map(|(t, x)| (*t, x)).collect();
            extrapolate(&points, t1)
        } else {
            x0 + h * f0
        };

        let timesteps: Vec<f64> = std::iter::once(h)
            .chain(
                self.history
                    .iter()
                    .zip(self.history.iter().skip(1))
                    .map(|(a, b)| a.0 - b.0),
            )
            .take(k)
            .collect();
        let (beta, alpha) = compute_bdf_coefficients(k, &timesteps)?;

        let mut x_hist = DVector::zeros(n);
        for (a, (_, xj)) in alpha.iter().zip(self.history.iter()) {
            x_hist.axpy(*a, xj, 1.0);
        }

        let jac = ctx.jacobian(x0, t0, f0)?;
        let stiffness = jac
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
            * h.abs();

        let mass = ctx.mass_matrix(n);
        let lu = ctx.factorize(&mass - (beta * h) * jac)?;

        let system = ctx.system;
        let norm = ctx.norm;
        let nonlinear = ctx.nonlinear;
        let solution = {
            let mut residual = |y: &DVector<f64>| -> Result<DVector<f64>, SolverError> {
                let fy = ctx.rhs_checked(y, t1)?;
                let lhs = match system.mass_matrix() {
                    Some(m) => m * (y - &x_hist),
                    None => y - &x_hist,
                };
                Ok(lhs - (beta * h) * fy)
            };
            let weighted = |d: &DVector<f64>| norm.norm(d, x0, x0);
            nonlinear.solve_nonlinear(&mut residual, lu.as_ref(), x_pred.clone(), &weighted)?
        };
        ctx.stats.nlinsolve += solution.iterations;

        let x_new = solution.root;
        if !all_finite(&x_new) {
            return Err(SolverError::Domain { t: t1 });
        }

        let error = (&x_new - &x_pred) / (k as f64 + 1.0);
        let error_norm = ctx.norm.norm(&error, x0, &x_new);

        Ok(StepResult {
            x_new,
            error: Some(error),
            error_norm,
            stages: Vec::new(),
            f_new: None,
            interpolation: InterpolationData::Hermite,
            stiffness: Some(stiffness),
        })
    }

    fn accept(&mut self, t: f64, x: &DVector<f64>, _h: f64) {
        self.history.push_front((t, x.clone()));
        self.history.truncate(self.family.max_order + 1);
    }

    fn rebase(&mut self, t: f64, x: &DVector<f64>) {
        match self.history.front_mut() {
            Some((t_front, x_front)) if *t_front == t => *x_front = x.clone(),
            _ => self.history.clear(),
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.order = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::testing::attempt;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_step_coefficients() {
        let (beta, alpha) = compute_bdf_coefficients(2, &[0.1, 0.1]).unwrap();
        assert_relative_eq!(beta, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(alpha[0], 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(alpha[1], -1.0 / 3.0, epsilon = 1e-12);

        let (beta, alpha) = compute_bdf_coefficients(3, &[0.5, 0.5, 0.5]).unwrap();
        assert_relative_eq!(beta, 6.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(alpha[0], 18.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(alpha[1], -9.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(alpha[2], 2.0 / 11.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variable_step_coefficients_are_consistent() {
        // alpha sums to one so constants are preserved
        for order in 1..=BDF_MAX_ORDER {
            let steps: Vec<f64> = (0..order).map(|j| 0.1 * (1.0 + 0.3 * j as f64)).collect();
            let (_, alpha) = compute_bdf_coefficients(order, &steps).unwrap();
            let sum: f64 = alpha.iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_insufficient_history() {
        let err = compute_bdf_coefficients(3, &[0.1, 0.1]).unwrap_err();
        assert!(matches!(err, SolverError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_extrapolate_quadratic() {
        let xs: Vec<DVector<f64>> = [0.0, 1.0, 2.0]
            .iter()
            .map(|t: &f64| DVector::from_element(1, t * t))
            .collect();
        let points = vec![(2.0, &xs[2]), (1.0, &xs[1]), (0.0, &xs[0])];
        assert_relative_eq!(extrapolate(&points, 3.0)[0], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_startup_is_backward_euler() {
        let mut bdf = Bdf::new(&BDF5);
        let res = attempt(&mut bdf, |x, _| -x, &[1.0], 0.0, 0.1).unwrap();
        assert_eq!(bdf.order(), 1);
        assert_relative_eq!(res.x_new[0], 1.0 / 1.1, epsilon = 1e-6);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut bdf = Bdf::new(&BDF2);
        for i in 0..6 {
            bdf.accept(i as f64, &DVector::zeros(1), 1.0);
        }
        assert_eq!(bdf.history_len(), 3);
        bdf.reset();
        assert_eq!(bdf.history_len(), 0);
    }

    #[test]
    fn test_rebase_keeps_older_points() {
        let mut bdf = Bdf::new(&BDF3);
        for i in 0..3 {
            bdf.accept(i as f64, &DVector::zeros(1), 1.0);
        }
        bdf.rebase(2.0, &DVector::from_element(1, 0.5));
        assert_eq!(bdf.history_len(), 3);
        assert_eq!(bdf.history[0].1[0], 0.5);

        // A point the history never reached starts over
        bdf.rebase(7.0, &DVector::zeros(1));
        assert_eq!(bdf.history_len(), 0);
    }
}
