//! Numerical integration steppers
//!
//! Provides:
//! - Explicit Runge-Kutta methods driven by Butcher tableaux (Euler, RK4,
//!   SSPRK22/33/34, RKBS32, RKF45, RKCK54, RKDP54)
//! - Rosenbrock methods with stiff-aware dense output (RODAS4)
//! - Variable-step BDF methods of order 1 to 5
//! - The linear and nonlinear solver interfaces used by implicit stages

mod base;
pub mod bdf;
mod descriptor;
pub mod explicit;
pub mod linear;
pub mod nonlinear;
pub mod rosenbrock;
pub mod tableau;

pub use base::*;
pub use bdf::{compute_bdf_coefficients, Bdf, BdfFamily};
pub use descriptor::*;
pub use explicit::ExplicitRk;
pub use linear::{DenseLu, Factorization, LinearSolver};
pub use nonlinear::{Newton, NonlinearSolution, NonlinearSolver};
pub use rosenbrock::{Rosenbrock, RosenbrockTableau};
pub use tableau::ButcherTableau;

#[cfg(test)]
pub(crate) mod testing {
    use nalgebra::DVector;

    use super::{DenseLu, Newton, SolverError, StepContext, StepResult, Stepper};
    use crate::config::JacobianMode;
    use crate::norm::{ErrorNorm, Tolerance, WeightedNorm};
    use crate::problem::{FnSystem, OdeSystem};
    use crate::solution::Stats;
    use crate::state::IntegratorState;

    /// Attempt a single step of size `h` from `(t0, x0)`
    pub(crate) fn attempt<F>(
        stepper: &mut dyn Stepper,
        rhs: F,
        x0: &[f64],
        t0: f64,
        h: f64,
    ) -> Result<StepResult, SolverError>
    where
        F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync + 'static,
    {
        let system = FnSystem::new(rhs);
        let x0 = DVector::from_column_slice(x0);
        let f0 = system.rhs(&x0, t0);
        let state = IntegratorState::new(t0, x0, f0, t0 + h, stepper.descriptor());

        let norm = WeightedNorm::new(Tolerance::Scalar(1e-6), Tolerance::Scalar(1e-6), ErrorNorm::Rms);
        let newton = Newton::default();
        let mut stats = Stats::default();
        let mut ctx = StepContext {
            system: &system,
            norm: &norm,
            jacobian: JacobianMode::Auto,
            linear: &DenseLu,
            nonlinear: &newton,
            stats: &mut stats,
        };
        stepper.attempt_step(&mut ctx, &state, h)
    }
}
