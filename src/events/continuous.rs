//! Continuous callbacks
//!
//! A continuous callback watches a condition `g(x, t)` and fires where it
//! crosses zero. Crossings are detected from the condition values at both
//! ends of an accepted step and located on the step's interpolant with an
//! Illinois-accelerated regula falsi, so no extra right-hand side evaluations
//! are spent on root finding.

use nalgebra::DVector;

use super::base::{AffectContext, AffectFn, CallbackPhase, ConditionFn, EventDirection};
use crate::dense::Segment;
use crate::utils::constants::{EVT_ITERATIONS_MAX, EVT_TOLERANCE};
use crate::utils::time_slack;

/// Fraction of the following step used to sample the condition after a
/// callback fired at its start
const EVT_SETTLE_FRACTION: f64 = 1e-3;

/// Zero-crossing callback located by root finding on the dense output
pub struct ContinuousCallback {
    condition: Box<ConditionFn>,
    affect: Option<Box<AffectFn>>,
    affect_neg: Option<Box<AffectFn>>,
    direction: EventDirection,
    tolerance: f64,
    max_iterations: usize,
    pub(crate) save_positions: (bool, bool),
    phase: CallbackPhase,
    /// Condition value at the current integrator point
    last_value: Option<f64>,
    /// The callback fired at the current integrator point
    fired: bool,
}

/// A located zero crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Event time, on the far side of the root in integration order
    pub t: f64,
    /// Condition went from negative to positive
    pub upcrossing: bool,
    /// The root finder met its tolerance
    pub converged: bool,
}

/// Result of a bracketed root search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    pub t: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Locate a sign change of `g` between `t0` and `t1`
///
/// `g0` and `g1` must have opposite signs. The returned time always lies on
/// the `t1` side of the root (or on it), within `tolerance` of the root when
/// `converged` is set. A bracket of two adjacent floats counts as converged,
/// since far from zero one ulp of `t` can exceed `tolerance`.
pub fn find_root<G>(
    mut g: G,
    (t0, g0): (f64, f64),
    (t1, g1): (f64, f64),
    tolerance: f64,
    max_iterations: usize,
) -> Root
where
    G: FnMut(f64) -> f64,
{
    let (mut a, mut fa) = (t0, g0);
    let (mut b, mut fb) = (t1, g1);
    // Which end moved last: -1 for `b`, +1 for `a`
    let mut side = 0;

    for iteration in 0..max_iterations {
        if is_resolved(a, b, tolerance) {
            return Root {
                t: b,
                converged: true,
                iterations: iteration,
            };
        }

        let mut t = (a * fb - b * fa) / (fb - fa);
        if !t.is_finite() || (t - a) * (t - b) >= 0.0 {
            t = 0.5 * (a + b);
        }

        let ft = g(t);
        if !ft.is_finite() {
            return Root {
                t: b,
                converged: false,
                iterations: iteration + 1,
            };
        }
        if ft == 0.0 {
            return Root {
                t,
                converged: true,
                iterations: iteration + 1,
            };
        }

        if ft.signum() == fb.signum() {
            b = t;
            fb = ft;
            if side == -1 {
                fa *= 0.5;
            }
            side = -1;
        } else {
            a = t;
            fa = ft;
            if side == 1 {
                fb *= 0.5;
            }
            side = 1;
        }
    }

    Root {
        t: b,
        converged: is_resolved(a, b, tolerance),
        iterations: max_iterations,
    }
}

/// Bracket within tolerance, or with no float left strictly inside it
fn is_resolved(a: f64, b: f64, tolerance: f64) -> bool {
    if (b - a).abs() <= tolerance {
        return true;
    }
    let mid = 0.5 * (a + b);
    mid == a || mid == b
}

impl ContinuousCallback {
    /// Callback running `affect` at every zero of `condition`
    pub fn new<C, A>(condition: C, affect: A) -> Self
    where
        C: Fn(&DVector<f64>, f64) -> f64 + Send + Sync + 'static,
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self {
            condition: Box::new(condition),
            affect: Some(Box::new(affect)),
            affect_neg: None,
            direction: EventDirection::All,
            tolerance: EVT_TOLERANCE,
            max_iterations: EVT_ITERATIONS_MAX,
            save_positions: (true, true),
            phase: CallbackPhase::Idle,
            last_value: None,
            fired: false,
        }
    }

    /// Callback that only records where `condition` crosses zero
    pub fn detect_only<C>(condition: C) -> Self
    where
        C: Fn(&DVector<f64>, f64) -> f64 + Send + Sync + 'static,
    {
        let mut cb = Self::new(condition, |_: &mut AffectContext<'_>| {});
        cb.affect = None;
        cb.save_positions = (false, false);
        cb
    }

    /// Run `affect` on downcrossings instead of the main affect
    pub fn with_affect_neg<A>(mut self, affect: A) -> Self
    where
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        self.affect_neg = Some(Box::new(affect));
        self
    }

    pub fn with_direction(mut self, direction: EventDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Time tolerance of the root finder
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_save_positions(mut self, before: bool, after: bool) -> Self {
        self.save_positions = (before, after);
        self
    }

    pub fn phase(&self) -> CallbackPhase {
        self.phase
    }

    pub fn direction(&self) -> EventDirection {
        self.direction
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn value(&self, x: &DVector<f64>, t: f64) -> f64 {
        (self.condition)(x, t)
    }

    /// Record the condition at a new integrator point
    ///
    /// `fired` marks a point where this callback just acted.
    pub(crate) fn reset_at(&mut self, x: &DVector<f64>, t: f64, fired: bool) {
        self.last_value = Some(self.value(x, t));
        self.fired = fired;
        self.phase = CallbackPhase::Idle;
    }

    /// Look for a crossing inside an accepted step
    ///
    /// Leaves the callback in [`CallbackPhase::RootFinding`] when a crossing
    /// was located; [`ContinuousCallback::settle`] returns it to idle.
    pub(crate) fn detect(&mut self, segment: &Segment) -> Option<Crossing> {
        let t0 = segment.t_start();
        let t1 = segment.t_end();
        let g1 = self.value(segment.x_end(), t1);

        let mut t0 = t0;
        let mut g0 = match self.last_value {
            Some(g) => g,
            None => self.value(segment.x_start(), t0),
        };
        if self.fired {
            // Bracket from just after the event, where the condition has
            // settled on its post-event side
            let t_after = t0 + EVT_SETTLE_FRACTION * (t1 - t0);
            let g_after = self.value(&segment.evaluate(t_after), t_after);
            if g_after != 0.0 && g_after.is_finite() {
                t0 = t_after;
                g0 = g_after;
            }
        }

        if !(g0.is_finite() && g1.is_finite()) || g0 == 0.0 {
            return None;
        }
        let crossed = g1 == 0.0 || g0.signum() != g1.signum();
        if !crossed || !self.direction.matches(g0, g1) {
            return None;
        }

        self.phase = CallbackPhase::ConditionTriggered;
        let upcrossing = g0 < 0.0;
        if g1 == 0.0 {
            self.phase = CallbackPhase::RootFinding;
            return Some(Crossing {
                t: t1,
                upcrossing,
                converged: true,
            });
        }

        self.phase = CallbackPhase::RootFinding;
        let condition = &self.condition;
        let root = find_root(
            |t| condition(&segment.evaluate(t), t),
            (t0, g0),
            (t1, g1),
            self.tolerance,
            self.max_iterations,
        );

        // A root within rounding of the step end is the step end
        let t = if (t1 - root.t).abs() <= time_slack(root.t, t1) {
            t1
        } else {
            root.t
        };
        Some(Crossing {
            t,
            upcrossing,
            converged: root.converged,
        })
    }

    /// Return to idle without acting (the crossing was superseded)
    pub(crate) fn settle(&mut self) {
        self.phase = CallbackPhase::Idle;
    }

    /// Affect responsible for a crossing
    pub(crate) fn affect_for(&mut self, crossing: &Crossing) -> Option<&mut AffectFn> {
        self.phase = CallbackPhase::Affecting;
        let affect = if crossing.upcrossing {
            self.affect.as_mut()
        } else {
            self.affect_neg.as_mut().or(self.affect.as_mut())
        };
        affect.map(|a| a.as_mut())
    }
}

/// Continuous callback terminating the integration where `condition` hits zero
pub fn terminate_when<C>(condition: C) -> ContinuousCallback
where
    C: Fn(&DVector<f64>, f64) -> f64 + Send + Sync + 'static,
{
    ContinuousCallback::new(condition, |ctx: &mut AffectContext<'_>| ctx.terminate())
        .with_save_positions(false, false)
}
