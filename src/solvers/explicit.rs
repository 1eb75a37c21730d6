//! Tableau-driven explicit Runge-Kutta stepper

use nalgebra::DVector;

use super::base::{SolverError, StepContext, StepResult, Stepper};
use super::descriptor::AlgorithmDescriptor;
use super::tableau::{ButcherTableau, DenseCoefficients};
use crate::dense::InterpolationData;
use crate::state::IntegratorState;
use crate::utils::all_finite;

/// Explicit Runge-Kutta stepper for any [`ButcherTableau`]
///
/// Stage `i` only depends on stages `< i`. The first stage reuses the cached
/// derivative of the engine state, so FSAL tableaux cost one evaluation less
/// per step.
#[derive(Debug, Clone)]
pub struct ExplicitRk {
    tableau: &'static ButcherTableau,
}

impl ExplicitRk {
    pub fn new(tableau: &'static ButcherTableau) -> Self {
        Self { tableau }
    }

    pub fn tableau(&self) -> &'static ButcherTableau {
        self.tableau
    }
}

/// `h * Σ w_i k_i`
fn weighted_sum(weights: &[f64], k: &[DVector<f64>], h: f64) -> DVector<f64> {
    let mut acc = DVector::zeros(k[0].len());
    for (w, ki) in weights.iter().zip(k) {
        if *w != 0.0 {
            acc.axpy(h * w, ki, 1.0);
        }
    }
    acc
}

impl Stepper for ExplicitRk {
    fn descriptor(&self) -> AlgorithmDescriptor {
        AlgorithmDescriptor::Explicit(self.tableau)
    }

    fn order(&self) -> usize {
        self.tableau.order
    }

    fn error_order(&self) -> usize {
        self.tableau.error_order()
    }

    fn is_adaptive(&self) -> bool {
        self.tableau.is_embedded()
    }

    fn attempt_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        state: &IntegratorState,
        h: f64,
    ) -> Result<StepResult, SolverError> {
        let tab = self.tableau;
        let t0 = state.t();
        let x0 = state.x();

        let mut k: Vec<DVector<f64>> = Vec::with_capacity(tab.stages());
        k.push(state.derivative().clone());

        // Inputs of the last two stages, used by the stiffness estimate
        let mut prev_input = x0.clone();
        let mut last_input = x0.clone();

        for i in 1..tab.stages() {
            let mut xi = x0.clone();
            for (j, &a) in tab.a[i].iter().enumerate() {
                if a != 0.0 {
                    xi.axpy(h * a, &k[j], 1.0);
                }
            }
            let ki = ctx.rhs_checked(&xi, t0 + tab.c[i] * h)?;
            prev_input = std::mem::replace(&mut last_input, xi);
            k.push(ki);
        }

        let x_new = if tab.fsal {
            last_input.clone()
        } else {
            x0 + weighted_sum(tab.b, &k, h)
        };
        if !all_finite(&x_new) {
            return Err(SolverError::Domain { t: t0 + h });
        }

        let error = tab.b_err.map(|e| weighted_sum(e, &k, h));
        let error_norm = error
            .as_ref()
            .map_or(0.0, |e| ctx.norm.norm(e, x0, &x_new));

        let interpolation = match tab.dense {
            DenseCoefficients::Hermite => InterpolationData::Hermite,
            DenseCoefficients::Midpoint(w) => InterpolationData::Midpoint {
                partial: weighted_sum(&w[..k.len()], &k, h),
                w_end: w[k.len()],
            },
            DenseCoefficients::Dopri5(d) => InterpolationData::Dopri5 {
                r5: weighted_sum(d, &k, h),
            },
        };

        let stiffness = if tab.stiffness_detection && k.len() >= 2 {
            let s = k.len();
            let num = (&k[s - 1] - &k[s - 2]).norm();
            let den = (&last_input - &prev_input).norm();
            (den > 0.0).then(|| h.abs() * num / den)
        } else {
            None
        };

        let f_new = tab.fsal.then(|| k[k.len() - 1].clone());

        Ok(StepResult {
            x_new,
            error,
            error_norm,
            stages: k,
            f_new,
            interpolation,
            stiffness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::tableau::{EULER, RK4, RKBS32, RKCK54, RKDP54, SSPRK33};
    use crate::solvers::testing::attempt;
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_single_step() {
        let mut rk = ExplicitRk::new(&EULER);
        let res = attempt(&mut rk, |x, _| -x, &[1.0], 0.0, 0.1).unwrap();
        assert_relative_eq!(res.x_new[0], 0.9);
        assert!(res.error.is_none());
        assert_eq!(res.error_norm, 0.0);
        assert!(!rk.is_adaptive());
    }

    #[test]
    fn test_rk4_matches_taylor() {
        // x' = x: one RK4 step reproduces the Taylor polynomial of degree 4
        let h: f64 = 0.1;
        let mut rk = ExplicitRk::new(&RK4);
        let res = attempt(&mut rk, |x, _| x.clone(), &[1.0], 0.0, h).unwrap();
        let taylor = 1.0 + h + h * h / 2.0 + h.powi(3) / 6.0 + h.powi(4) / 24.0;
        assert_relative_eq!(res.x_new[0], taylor, epsilon = 1e-15);
    }

    #[test]
    fn test_time_dependent_rhs() {
        // x' = t integrates exactly with any method of order >= 2
        let mut rk = ExplicitRk::new(&SSPRK33);
        let res = attempt(&mut rk, |_, t| DVector::from_element(1, t), &[0.0], 1.0, 0.5).unwrap();
        assert_relative_eq!(res.x_new[0], 0.5 * (1.5_f64.powi(2) - 1.0), epsilon = 1e-14);
    }

    #[test]
    fn test_fsal_returns_new_derivative() {
        let mut rk = ExplicitRk::new(&RKBS32);
        let res = attempt(&mut rk, |x, _| -x, &[1.0], 0.0, 0.1).unwrap();
        let f_new = res.f_new.expect("FSAL tableau");
        assert_relative_eq!(f_new[0], -res.x_new[0], epsilon = 1e-15);
        assert!(res.error_norm > 0.0);
    }

    #[test]
    fn test_dopri_stiffness_estimate() {
        // Linear problem: the estimate is exactly |h λ|
        let mut rk = ExplicitRk::new(&RKDP54);
        let res = attempt(&mut rk, |x, _| -50.0 * x, &[1.0], 0.0, 0.01).unwrap();
        assert_relative_eq!(res.stiffness.unwrap(), 0.5, epsilon = 1e-8);
        assert!(matches!(res.interpolation, InterpolationData::Dopri5 { .. }));
    }

    #[test]
    fn test_cash_karp_carries_midpoint_data() {
        let mut rk = ExplicitRk::new(&RKCK54);
        let res = attempt(&mut rk, |x, _| -x, &[1.0], 0.0, 0.1).unwrap();
        match res.interpolation {
            InterpolationData::Midpoint { partial, w_end } => {
                assert_eq!(partial.len(), 1);
                assert_relative_eq!(w_end, 1.0 / 32.0);
            }
            other => panic!("unexpected interpolation {:?}", other),
        }
    }

    #[test]
    fn test_nan_is_domain_error() {
        let mut rk = ExplicitRk::new(&RK4);
        let err = attempt(&mut rk, |x, _| x.map(|v| v / 0.0 * 0.0), &[1.0], 0.0, 0.1).unwrap_err();
        assert!(matches!(err, SolverError::Domain { .. }));
    }
}
