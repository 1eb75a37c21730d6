//! Rosenbrock (linearly implicit) stepper
//!
//! Stages are computed in the transformed form of Hairer & Wanner, one LU
//! factorisation of `W = M/(hγ) - J` per step:
//!
//! ```text
//! W u_i = f(t + α_i h, x + Σ a_ij u_j) + Σ (c_ij/h) M u_j + h γ_i ∂f/∂t
//! x_new = x + Σ m_i u_i,    err = Σ (m_i - m̂_i) u_i
//! ```
//!
//! # References
//! - Hairer, E., & Wanner, G. (1996). "Solving Ordinary Differential
//!   Equations II", §IV.7.

use nalgebra::DVector;

use super::base::{SolverError, StepContext, StepResult, Stepper};
use super::descriptor::AlgorithmDescriptor;
use crate::dense::InterpolationData;
use crate::state::IntegratorState;
use crate::utils::all_finite;

/// Coefficients of a Rosenbrock method in transformed form
#[derive(Debug, PartialEq)]
pub struct RosenbrockTableau {
    pub name: &'static str,
    /// Diagonal of the Γ matrix
    pub gamma: f64,
    /// Stage nodes
    pub alpha: &'static [f64],
    /// Stage couplings, strictly lower triangular
    pub a: &'static [&'static [f64]],
    /// Γ couplings, strictly lower triangular
    pub c: &'static [&'static [f64]],
    /// Row sums of Γ, multiplies `h ∂f/∂t`
    pub gamma_sum: &'static [f64],
    pub m: &'static [f64],
    pub m_hat: &'static [f64],
    pub order: usize,
    pub embedded_order: usize,
    /// Stiff-aware dense output weights on the first stages
    pub dense: Option<(&'static [f64], &'static [f64])>,
}

impl RosenbrockTableau {
    pub fn stages(&self) -> usize {
        self.alpha.len()
    }
}

/// RODAS4: 6 stages, order 4(3), L-stable and stiffly accurate
#[rustfmt::skip]
pub const RODAS4: RosenbrockTableau = RosenbrockTableau {
    name: "RODAS4",
    gamma: 0.25,
    alpha: &[0.0, 0.386, 0.21, 0.63, 1.0, 1.0],
    a: &[
        &[],
        &[0.1544000000000000e+01],
        &[0.9466785280815826e+00, 0.2557011698983284e+00],
        &[0.3314825187068521e+01, 0.2896124015972201e+01, 0.9986419139977817e+00],
        &[0.1221224509226641e+01, 0.6019134481288629e+01, 0.1253708332932087e+02, -0.6878860361058950e+00],
        &[0.1221224509226641e+01, 0.6019134481288629e+01, 0.1253708332932087e+02, -0.6878860361058950e+00, 1.0],
    ],
    c: &[
        &[],
        &[-0.5668800000000000e+01],
        &[-0.2430093356833875e+01, -0.2063599157091915e+00],
        &[-0.1073529058151375e+00, -0.9594562251023355e+01, -0.2047028614809616e+02],
        &[0.7496443313967647e+01, -0.1024680431464352e+02, -0.3399990352819905e+02, 0.1170890893206160e+02],
        &[0.8083246795921522e+01, -0.7981132988064893e+01, -0.3152159432874371e+02, 0.1631930543123136e+02, -0.6058818238834054e+01],
    ],
    gamma_sum: &[0.25, -0.1043, 0.1035, -0.03620000000000023, 0.0, 0.0],
    m: &[
        0.1221224509226641e+01, 0.6019134481288629e+01, 0.1253708332932087e+02,
        -0.6878860361058950e+00, 1.0, 1.0,
    ],
    m_hat: &[
        0.1221224509226641e+01, 0.6019134481288629e+01, 0.1253708332932087e+02,
        -0.6878860361058950e+00, 1.0, 0.0,
    ],
    order: 4,
    embedded_order: 3,
    dense: Some((
        &[10.12623508344586, -7.487995877610167, -34.80091861555747, -7.992771707568823, 1.025137723295662],
        &[-0.6762803392801253, 6.087714651680015, 16.43084320892478, 24.76722511418386, -6.594389125716872],
    )),
};

/// Rosenbrock stepper for any [`RosenbrockTableau`]
#[derive(Debug, Clone)]
pub struct Rosenbrock {
    tableau: &'static RosenbrockTableau,
}

impl Rosenbrock {
    pub fn new(tableau: &'static RosenbrockTableau) -> Self {
        Self { tableau }
    }
}

impl Stepper for Rosenbrock {
    fn descriptor(&self) -> AlgorithmDescriptor {
        AlgorithmDescriptor::Rosenbrock(self.tableau)
    }

    fn order(&self) -> usize {
        self.tableau.order
    }

    fn error_order(&self) -> usize {
        self.tableau.order.min(self.tableau.embedded_order)
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn attempt_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        state: &IntegratorState,
        h: f64,
    ) -> Result<StepResult, SolverError> {
        let tab = self.tableau;
        let n = state.x().len();
        let t0 = state.t();
        let x0 = state.x();
        let f0 = state.derivative();

        let jac = ctx.jacobian(x0, t0, f0)?;
        // |h| * ||J||_inf bounds |h λ| for the dominant mode
        let stiffness = jac
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
            * h.abs();
        let ft = ctx.time_derivative(x0, t0, f0);
        let mass = ctx.mass_matrix(n);

        // W = M/(hγ) - J
        let w = mass / (h * tab.gamma) - jac;
        let lu = ctx.factorize(w)?;

        let mut u: Vec<DVector<f64>> = Vec::with_capacity(tab.stages());
        for i in 0..tab.stages() {
            let fi = if i == 0 {
                f0.clone()
            } else {
                let mut xi = x0.clone();
                for (j, &a) in tab.a[i].iter().enumerate() {
                    if a != 0.0 {
                        xi.axpy(a, &u[j], 1.0);
                    }
                }
                ctx.rhs_checked(&xi, t0 + tab.alpha[i] * h)?
            };

            let mut coupling = DVector::zeros(n);
            for (j, &c) in tab.c[i].iter().enumerate() {
                if c != 0.0 {
                    coupling.axpy(c / h, &u[j], 1.0);
                }
            }

            let mut rhs = fi + ctx.mass_times(&coupling);
            if tab.gamma_sum[i] != 0.0 {
                rhs.axpy(h * tab.gamma_sum[i], &ft, 1.0);
            }
            u.push(ctx.solve(lu.as_ref(), &rhs)?);
        }

        let mut x_new = x0.clone();
        let mut error = DVector::zeros(n);
        for (i, ui) in u.iter().enumerate() {
            if tab.m[i] != 0.0 {
                x_new.axpy(tab.m[i], ui, 1.0);
            }
            let diff = tab.m[i] - tab.m_hat[i];
            if diff != 0.0 {
                error.axpy(diff, ui, 1.0);
            }
        }
        if !all_finite(&x_new) {
            return Err(SolverError::Domain { t: t0 + h });
        }
        let error_norm = ctx.norm.norm(&error, x0, &x_new);

        let interpolation = match tab.dense {
            Some((d2, d3)) => {
                let mut k1 = DVector::zeros(n);
                let mut k2 = DVector::zeros(n);
                for (i, ui) in u.iter().enumerate().take(d2.len()) {
                    k1.axpy(d2[i], ui, 1.0);
                    k2.axpy(d3[i], ui, 1.0);
                }
                InterpolationData::StiffAware { k1, k2 }
            }
            None => InterpolationData::Hermite,
        };

        Ok(StepResult {
            x_new,
            error: Some(error),
            error_norm,
            stages: u,
            f_new: None,
            interpolation,
            stiffness: Some(stiffness),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::testing::attempt;
    use approx::assert_relative_eq;

    #[test]
    fn test_rodas4_coefficients() {
        let tab = &RODAS4;
        assert_eq!(tab.stages(), 6);
        for (i, row) in tab.a.iter().enumerate() {
            assert_eq!(row.len(), i);
            assert_eq!(tab.c[i].len(), i);
        }
        // Stiffly accurate: the last stage input is the solution minus the last increment
        for (j, &a) in tab.a[5].iter().enumerate() {
            assert_relative_eq!(a, tab.m[j]);
        }
    }

    #[test]
    fn test_rodas4_stiff_decay() {
        // Far beyond the explicit stability limit
        let mut ros = Rosenbrock::new(&RODAS4);
        let res = attempt(&mut ros, |x, _| -1000.0 * x, &[1.0], 0.0, 1.0).unwrap();
        assert!(res.x_new[0].abs() < 0.1);
        assert!(res.error_norm.is_finite());
    }

    #[test]
    fn test_rodas4_accuracy_nonstiff() {
        let h: f64 = 0.1;
        let mut ros = Rosenbrock::new(&RODAS4);
        let res = attempt(&mut ros, |x, _| -x, &[1.0], 0.0, h).unwrap();
        assert_relative_eq!(res.x_new[0], (-h).exp(), epsilon = 1e-5);
    }

    #[test]
    fn test_rodas4_non_autonomous() {
        // x' = cos t, exact x = sin t
        let h: f64 = 0.05;
        let mut ros = Rosenbrock::new(&RODAS4);
        let res = attempt(&mut ros, |_, t| DVector::from_element(1, t.cos()), &[0.0], 0.0, h).unwrap();
        assert_relative_eq!(res.x_new[0], h.sin(), epsilon = 1e-6);
    }
}
