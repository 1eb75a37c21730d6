//! Mutable integrator state
//!
//! Owned by the engine. Steppers and selectors see it read-only; callbacks
//! mutate it only through [`crate::events::AffectContext`].

use nalgebra::DVector;
use std::collections::VecDeque;

use crate::solvers::AlgorithmDescriptor;
use crate::utils::constants::SOL_ERROR_FLOOR;

/// Number of recent accepted steps retained
const RECENT_STEPS: usize = 8;

/// Number of error norms retained for the controller
const ERROR_HISTORY: usize = 4;

/// Snapshot of an integration in progress
#[derive(Debug, Clone)]
pub struct IntegratorState {
    pub(crate) t: f64,
    pub(crate) x: DVector<f64>,
    /// Step size magnitude for the next attempt
    pub(crate) dt: f64,
    pub(crate) direction: f64,
    pub(crate) t_final: f64,
    /// Derivative at `(t, x)`
    pub(crate) f: DVector<f64>,
    pub(crate) order: usize,
    pub(crate) error_order: usize,
    pub(crate) accepted: usize,
    pub(crate) rejected: usize,
    pub(crate) consecutive_rejections: usize,
    pub(crate) error_history: VecDeque<f64>,
    pub(crate) last_error: Option<f64>,
    pub(crate) stiffness: Option<f64>,
    pub(crate) active: usize,
    pub(crate) descriptor: AlgorithmDescriptor,
    pub(crate) recent: VecDeque<(f64, DVector<f64>)>,
}

impl IntegratorState {
    pub(crate) fn new(
        t: f64,
        x: DVector<f64>,
        f: DVector<f64>,
        t_final: f64,
        descriptor: AlgorithmDescriptor,
    ) -> Self {
        let direction = if t_final >= t { 1.0 } else { -1.0 };
        let mut recent = VecDeque::with_capacity(RECENT_STEPS);
        recent.push_back((t, x.clone()));
        Self {
            t,
            x,
            dt: 0.0,
            direction,
            t_final,
            f,
            order: descriptor.order(),
            error_order: descriptor.order(),
            accepted: 0,
            rejected: 0,
            consecutive_rejections: 0,
            error_history: VecDeque::with_capacity(ERROR_HISTORY),
            last_error: None,
            stiffness: None,
            active: 0,
            descriptor,
            recent,
        }
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Magnitude of the step size proposed for the next attempt
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Signed step size proposed for the next attempt
    pub fn signed_dt(&self) -> f64 {
        self.direction * self.dt
    }

    /// +1 for forward, -1 for reverse integration
    pub fn direction(&self) -> f64 {
        self.direction
    }

    pub fn t_final(&self) -> f64 {
        self.t_final
    }

    /// Cached derivative `f(x, t)` at the current point
    pub fn derivative(&self) -> &DVector<f64> {
        &self.f
    }

    /// Order of the active method
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn accepted_steps(&self) -> usize {
        self.accepted
    }

    pub fn rejected_steps(&self) -> usize {
        self.rejected
    }

    pub fn consecutive_rejections(&self) -> usize {
        self.consecutive_rejections
    }

    /// Weighted error norms of the most recent accepted steps, oldest first
    pub fn error_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.error_history.iter().copied()
    }

    /// Weighted error norm of the last attempt (accepted or not)
    pub fn last_error(&self) -> Option<f64> {
        self.last_error
    }

    /// Running estimate of `|dt| * L` where `L` bounds the Jacobian spectrum
    pub fn stiffness(&self) -> Option<f64> {
        self.stiffness
    }

    /// Index of the active algorithm within its composite
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn descriptor(&self) -> AlgorithmDescriptor {
        self.descriptor
    }

    /// Recent accepted `(t, x)` pairs, oldest first
    pub fn recent_steps(&self) -> impl Iterator<Item = (f64, &DVector<f64>)> + '_ {
        self.recent.iter().map(|(t, x)| (*t, x))
    }

    /// Remaining signed distance to the final time
    pub fn remaining(&self) -> f64 {
        self.t_final - self.t
    }

    /// Has the integration reached its final time?
    pub fn is_finished(&self) -> bool {
        self.direction * (self.t_final - self.t) <= 0.0
    }

    /// Error norm of the previous accepted step for the integral term
    pub(crate) fn previous_error(&self) -> f64 {
        self.error_history
            .back()
            .map_or(1.0, |e| e.max(SOL_ERROR_FLOOR))
    }

    pub(crate) fn record_error(&mut self, err: f64) {
        if self.error_history.len() == ERROR_HISTORY {
            self.error_history.pop_front();
        }
        self.error_history.push_back(err);
    }

    /// Move to an accepted point
    pub(crate) fn advance(&mut self, t: f64, x: DVector<f64>, f: DVector<f64>) {
        self.t = t;
        self.x = x;
        self.f = f;
        if self.recent.len() == RECENT_STEPS {
            self.recent.pop_front();
        }
        self.recent.push_back((self.t, self.x.clone()));
    }

    /// Replace the current point without recording a new step
    pub(crate) fn rewind(&mut self, t: f64, x: DVector<f64>, f: DVector<f64>) {
        self.t = t;
        self.x = x;
        self.f = f;
        if let Some(last) = self.recent.back_mut() {
            *last = (self.t, self.x.clone());
        }
    }

    /// Blend a new stiffness estimate into the running value
    pub(crate) fn update_stiffness(&mut self, estimate: f64) {
        if !estimate.is_finite() {
            return;
        }
        self.stiffness = Some(match self.stiffness {
            Some(prev) => 0.5 * (prev + estimate),
            None => estimate,
        });
    }
}
