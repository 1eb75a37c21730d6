//! Problem definition consumed by the integrator
//!
//! The problem is immutable for the lifetime of an integration. Many
//! trajectories may integrate the same problem concurrently, so every system
//! must be `Send + Sync` and free of interior mutability.

use nalgebra::{DMatrix, DVector};

/// Right-hand side of `M dx/dt = f(x, t)`
pub trait OdeSystem: Send + Sync {
    /// Evaluate the derivative at state `x` and time `t`
    fn rhs(&self, x: &DVector<f64>, t: f64) -> DVector<f64>;

    /// Analytic Jacobian `∂f/∂x`, if available
    fn jacobian(&self, x: &DVector<f64>, t: f64) -> Option<DMatrix<f64>> {
        let _ = (x, t);
        None
    }

    /// Whether [`OdeSystem::jacobian`] returns a matrix
    fn has_jacobian(&self) -> bool {
        false
    }

    /// Constant mass matrix, `None` means identity
    fn mass_matrix(&self) -> Option<&DMatrix<f64>> {
        None
    }

    /// Systems that do not depend on `t` skip the `∂f/∂t` term of
    /// Rosenbrock stages
    fn is_autonomous(&self) -> bool {
        false
    }
}

type RhsFn = dyn Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync;
type JacFn = dyn Fn(&DVector<f64>, f64) -> DMatrix<f64> + Send + Sync;

/// Closure-backed [`OdeSystem`]
///
/// # Example
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use odeflow::problem::{FnSystem, OdeSystem};
///
/// let sys = FnSystem::new(|x: &DVector<f64>, _t| -x)
///     .with_jacobian(|x: &DVector<f64>, _t| -DMatrix::identity(x.len(), x.len()));
/// assert!(sys.has_jacobian());
/// ```
pub struct FnSystem {
    rhs: Box<RhsFn>,
    jacobian: Option<Box<JacFn>>,
    mass: Option<DMatrix<f64>>,
    autonomous: bool,
}

impl FnSystem {
    /// Wrap a right-hand side closure `f(x, t)`
    pub fn new<F>(rhs: F) -> Self
    where
        F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync + 'static,
    {
        Self {
            rhs: Box::new(rhs),
            jacobian: None,
            mass: None,
            autonomous: false,
        }
    }

    /// Attach an analytic Jacobian
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&DVector<f64>, f64) -> DMatrix<f64> + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    /// Attach a constant mass matrix
    pub fn with_mass_matrix(mut self, mass: DMatrix<f64>) -> Self {
        self.mass = Some(mass);
        self
    }

    /// Declare that the right-hand side does not depend on time
    pub fn autonomous(mut self) -> Self {
        self.autonomous = true;
        self
    }
}

impl OdeSystem for FnSystem {
    fn rhs(&self, x: &DVector<f64>, t: f64) -> DVector<f64> {
        (self.rhs)(x, t)
    }

    fn jacobian(&self, x: &DVector<f64>, t: f64) -> Option<DMatrix<f64>> {
        self.jacobian.as_ref().map(|jac| jac(x, t))
    }

    fn has_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }

    fn mass_matrix(&self) -> Option<&DMatrix<f64>> {
        self.mass.as_ref()
    }

    fn is_autonomous(&self) -> bool {
        self.autonomous
    }
}

/// Initial value problem: system, initial state and time span
pub struct OdeProblem {
    system: Box<dyn OdeSystem>,
    initial: DVector<f64>,
    t_span: (f64, f64),
}

impl OdeProblem {
    /// Create a problem from any [`OdeSystem`]
    pub fn new<S>(system: S, initial: DVector<f64>, t_span: (f64, f64)) -> Self
    where
        S: OdeSystem + 'static,
    {
        Self {
            system: Box::new(system),
            initial,
            t_span,
        }
    }

    /// Create a problem straight from a right-hand side closure
    pub fn from_fn<F>(rhs: F, initial: DVector<f64>, t_span: (f64, f64)) -> Self
    where
        F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync + 'static,
    {
        Self::new(FnSystem::new(rhs), initial, t_span)
    }

    pub fn system(&self) -> &dyn OdeSystem {
        self.system.as_ref()
    }

    pub fn initial(&self) -> &DVector<f64> {
        &self.initial
    }

    pub fn t_span(&self) -> (f64, f64) {
        self.t_span
    }

    /// Number of state components
    pub fn dim(&self) -> usize {
        self.initial.len()
    }

    /// +1 for forward integration, -1 for reverse
    pub fn direction(&self) -> f64 {
        if self.t_span.1 >= self.t_span.0 {
            1.0
        } else {
            -1.0
        }
    }
}
