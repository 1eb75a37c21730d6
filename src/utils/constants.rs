//! Integration constants and defaults

/// Minimum timestep for adaptive integration
pub const SIM_TIMESTEP_MIN: f64 = 1e-12;

/// Maximum timestep for adaptive integration
pub const SIM_TIMESTEP_MAX: f64 = f64::MAX;

/// Consecutive rejections tolerated before giving up on a step
pub const SIM_REJECTIONS_MAX: usize = 50;

/// Accepted steps allowed before giving up on a trajectory
pub const SIM_STEPS_MAX: usize = 1_000_000;

/// Minimum scale factor for timestep adjustment
pub const SOL_SCALE_MIN: f64 = 0.2;

/// Maximum scale factor for timestep adjustment
pub const SOL_SCALE_MAX: f64 = 10.0;

/// Safety factor for adaptive error control
pub const SOL_BETA: f64 = 0.9;

/// Integral gain of the PI controller
pub const SOL_PI_BETA: f64 = 0.4;

/// Floor applied to the previous error norm in the integral term
pub const SOL_ERROR_FLOOR: f64 = 1e-4;

/// Step shrink applied after a domain or solver failure
pub const SOL_SCALE_FAILURE: f64 = 0.25;

/// Default absolute tolerance for local truncation error
pub const SOL_TOLERANCE_LTE_ABS: f64 = 1e-6;

/// Default relative tolerance for local truncation error
pub const SOL_TOLERANCE_LTE_REL: f64 = 1e-3;

/// Convergence threshold of the Newton iteration (weighted norm)
pub const NEWTON_TOLERANCE: f64 = 1e-3;

/// Newton iterations before an implicit stage is declared divergent
pub const NEWTON_ITERATIONS_MAX: usize = 10;

/// Default time tolerance for event localisation
pub const EVT_TOLERANCE: f64 = 1e-10;

/// Iteration budget of the event root finder
pub const EVT_ITERATIONS_MAX: usize = 100;
