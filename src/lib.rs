//! odeflow - Adaptive integration of ordinary differential equations
//!
//! Integrates `M x' = f(x, t)` over a time span with a choice of explicit
//! Runge-Kutta, Rosenbrock and BDF steppers behind one engine.
//!
//! # Architecture
//!
//! - [`problem`]: the system `f`, its optional Jacobian and mass matrix, `x0`
//!   and the time span
//! - [`solvers`]: stepper trait, tableaux, algorithm descriptors, linear and
//!   nonlinear solvers
//! - [`controller`]: PI step size control
//! - [`dense`]: per-step interpolants
//! - [`events`]: continuous, discrete and periodic callbacks
//! - [`composite`]: several algorithms behind a selector
//! - [`integrator`]: the engine tying it all together
//!
//! # Example
//!
//! ```rust
//! use nalgebra::DVector;
//! use odeflow::prelude::*;
//!
//! // Harmonic oscillator x'' = -x
//! let problem = OdeProblem::from_fn(
//!     |x, _t| DVector::from_vec(vec![x[1], -x[0]]),
//!     DVector::from_vec(vec![1.0, 0.0]),
//!     (0.0, std::f64::consts::PI),
//! );
//! let config = IntegratorConfig::new().with_tolerances(1e-9, 1e-9);
//! let sol = solve(&problem, RKDP54, config).unwrap();
//!
//! let x_half = sol.evaluate(0.5 * std::f64::consts::PI).unwrap();
//! assert!(x_half[0].abs() < 1e-6);
//! ```

pub mod composite;
pub mod config;
pub mod controller;
pub mod dense;
pub mod error;
pub mod events;
pub mod integrator;
pub mod norm;
pub mod problem;
pub mod solution;
pub mod solvers;
pub mod state;
pub mod utils;

pub use composite::{Algorithm, CompositeAlgorithm};
pub use config::{IntegratorConfig, JacobianMode};
pub use error::{IntegrationError, SolveFailure};
pub use integrator::{solve, solve_with_callbacks, Integrator, StepStatus};
pub use problem::{FnSystem, OdeProblem, OdeSystem};
pub use solution::{ReturnCode, Solution, Stats};
pub use state::IntegratorState;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::composite::{Algorithm, CompositeAlgorithm};
    pub use crate::config::{IntegratorConfig, JacobianMode};
    pub use crate::controller::PiController;
    pub use crate::error::{IntegrationError, SolveFailure};
    pub use crate::events::{
        terminate_when, AffectContext, Callback, CallbackPhase, CallbackSet, ContinuousCallback,
        DiscreteCallback, EventDirection, PeriodicCallback, Schedule,
    };
    #[cfg(feature = "rand-support")]
    pub use crate::events::{NoiseScale, ProbIntsNoise};
    pub use crate::integrator::{solve, solve_with_callbacks, Integrator, StepStatus};
    pub use crate::norm::{ErrorNorm, Tolerance};
    pub use crate::problem::{FnSystem, OdeProblem, OdeSystem};
    pub use crate::solution::{ReturnCode, Solution, Stats};
    pub use crate::solvers::{
        AlgorithmDescriptor, BDF1, BDF2, BDF3, BDF4, BDF5, EULER, RK4, RKBS32, RKCK54, RKDP54,
        RKF45, RODAS4, SSPRK22, SSPRK33, SSPRK34,
    };
    pub use crate::state::IntegratorState;
}
