//! Callback types shared by every kind of event

use nalgebra::DVector;

use super::continuous::ContinuousCallback;
use super::discrete::DiscreteCallback;
use super::periodic::PeriodicCallback;
use crate::state::IntegratorState;

/// Event condition `g(x, t)`; a continuous event fires where it crosses zero
pub type ConditionFn = dyn Fn(&DVector<f64>, f64) -> f64 + Send + Sync;

/// Action run when a callback fires
pub type AffectFn = dyn FnMut(&mut AffectContext<'_>) + Send;

/// Crossing directions a continuous callback reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDirection {
    #[default]
    All,
    /// Condition goes from negative to positive
    Positive,
    /// Condition goes from positive to negative
    Negative,
}

impl EventDirection {
    /// Does a crossing from `g0` to `g1` match this direction?
    pub fn matches(&self, g0: f64, g1: f64) -> bool {
        match self {
            Self::All => true,
            Self::Positive => g0 < 0.0 && g1 >= 0.0,
            Self::Negative => g0 > 0.0 && g1 <= 0.0,
        }
    }
}

/// Where a callback is in its detect/locate/act cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackPhase {
    #[default]
    Idle,
    ConditionTriggered,
    RootFinding,
    Affecting,
}

/// Controlled access to the integrator from inside an affect
///
/// Affects may read the current point and step data, overwrite the state,
/// request termination or force the size of the next step. Writing the state
/// through [`AffectContext::state_mut`] makes the integrator refresh the
/// cached derivative and restart multistep history.
pub struct AffectContext<'a> {
    state: &'a mut IntegratorState,
    step: f64,
    modified: bool,
    perturbed: bool,
    terminate: bool,
    next_dt: Option<f64>,
}

impl<'a> AffectContext<'a> {
    pub(crate) fn new(state: &'a mut IntegratorState, step: f64) -> Self {
        Self {
            state,
            step,
            modified: false,
            perturbed: false,
            terminate: false,
            next_dt: None,
        }
    }

    pub fn t(&self) -> f64 {
        self.state.t
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state.x
    }

    /// Mutable state; marks it modified
    pub fn state_mut(&mut self) -> &mut DVector<f64> {
        self.modified = true;
        &mut self.state.x
    }

    /// Mutable state for a small in-place perturbation
    ///
    /// Unlike [`AffectContext::state_mut`] the point is treated as the same
    /// solution slightly displaced, so multistep methods keep their history.
    pub fn perturb_state(&mut self) -> &mut DVector<f64> {
        self.perturbed = true;
        &mut self.state.x
    }

    /// Magnitude of the step that led to the current point
    pub fn dt(&self) -> f64 {
        self.step
    }

    /// Order of the active method
    pub fn order(&self) -> usize {
        self.state.order
    }

    /// Weighted error norm of the last step
    pub fn error_estimate(&self) -> Option<f64> {
        self.state.last_error
    }

    /// Read-only view of the full integrator state
    pub fn integrator(&self) -> &IntegratorState {
        &*self.state
    }

    /// Stop the integration after this callback round
    pub fn terminate(&mut self) {
        self.terminate = true;
    }

    /// Force the magnitude of the next step
    pub fn set_next_dt(&mut self, dt: f64) {
        self.next_dt = Some(dt.abs());
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_perturbed(&self) -> bool {
        self.perturbed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate
    }

    pub(crate) fn into_outcome(self) -> AffectOutcome {
        AffectOutcome {
            modified: self.modified,
            perturbed: self.perturbed,
            terminate: self.terminate,
            next_dt: self.next_dt,
        }
    }
}

/// What a round of affects asked of the integrator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct AffectOutcome {
    pub modified: bool,
    pub perturbed: bool,
    pub terminate: bool,
    pub next_dt: Option<f64>,
}

impl AffectOutcome {
    /// Did any affect write to the state?
    pub fn state_changed(&self) -> bool {
        self.modified || self.perturbed
    }

    pub fn merge(&mut self, other: AffectOutcome) {
        self.modified |= other.modified;
        self.perturbed |= other.perturbed;
        self.terminate |= other.terminate;
        if other.next_dt.is_some() {
            self.next_dt = other.next_dt;
        }
    }
}

/// Run `affect` against the state
pub(crate) fn run_affect<F>(affect: &mut F, state: &mut IntegratorState, step: f64) -> AffectOutcome
where
    F: FnMut(&mut AffectContext<'_>) + ?Sized,
{
    let mut ctx = AffectContext::new(state, step);
    affect(&mut ctx);
    ctx.into_outcome()
}

/// Any kind of callback
pub enum Callback {
    Continuous(ContinuousCallback),
    Discrete(DiscreteCallback),
    Periodic(PeriodicCallback),
}

impl Callback {
    /// Save the state `(before, after)` the affect runs
    pub fn save_positions(&self) -> (bool, bool) {
        match self {
            Self::Continuous(cb) => cb.save_positions,
            Self::Discrete(cb) => cb.save_positions,
            Self::Periodic(cb) => cb.save_positions,
        }
    }

    pub fn phase(&self) -> CallbackPhase {
        match self {
            Self::Continuous(cb) => cb.phase(),
            Self::Discrete(_) | Self::Periodic(_) => CallbackPhase::Idle,
        }
    }
}

impl From<ContinuousCallback> for Callback {
    fn from(cb: ContinuousCallback) -> Self {
        Self::Continuous(cb)
    }
}

impl From<DiscreteCallback> for Callback {
    fn from(cb: DiscreteCallback) -> Self {
        Self::Discrete(cb)
    }
}

impl From<PeriodicCallback> for Callback {
    fn from(cb: PeriodicCallback) -> Self {
        Self::Periodic(cb)
    }
}

/// Ordered set of callbacks
///
/// The position of a callback in the set is the index reported in event
/// records. Callbacks firing together run in set order.
#[derive(Default)]
pub struct CallbackSet {
    callbacks: Vec<Callback>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback, builder style
    pub fn with(mut self, callback: impl Into<Callback>) -> Self {
        self.callbacks.push(callback.into());
        self
    }

    /// Append a callback and return its index
    pub fn push(&mut self, callback: impl Into<Callback>) -> usize {
        self.callbacks.push(callback.into());
        self.callbacks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Callback> {
        self.callbacks.get(index)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Callback)> {
        self.callbacks.iter_mut().enumerate()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Callback> {
        self.callbacks.get_mut(index)
    }

    /// Earliest pending periodic time strictly ahead of `t`
    pub(crate) fn next_stop(&self, t: f64, direction: f64) -> Option<f64> {
        self.callbacks
            .iter()
            .filter_map(|cb| match cb {
                Callback::Periodic(p) => p.pending(),
                _ => None,
            })
            .filter(|&s| direction * (s - t) > 0.0)
            .min_by(|a, b| (direction * a).total_cmp(&(direction * b)))
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("len", &self.callbacks.len())
            .finish()
    }
}
