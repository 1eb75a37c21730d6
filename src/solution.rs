//! Integration results
//!
//! A [`Solution`] carries the saved `(t, x)` pairs, the dense output built
//! from every accepted step and the bookkeeping gathered on the way.

use nalgebra::DVector;

use crate::dense::{DenseOutput, InterpolationError};
use crate::solvers::AlgorithmDescriptor;

/// Work counters of one integration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Accepted steps
    pub accepted: usize,
    /// Rejected step attempts
    pub rejected: usize,
    /// Right-hand side evaluations
    pub nfev: usize,
    /// Jacobian evaluations (analytic or finite-difference)
    pub njac: usize,
    /// Matrix factorisations
    pub nfactor: usize,
    /// Linear solves
    pub nlinsolve: usize,
}

/// How an integration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// Reached the final time
    Success,
    /// A callback requested termination
    Terminated,
    /// The cancellation token was set
    Cancelled,
}

/// A callback firing
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Index of the callback within its set
    pub callback: usize,
    pub t: f64,
}

/// Non-fatal anomalies met during the integration
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Root finding did not converge; the event was placed at `t`, the later
    /// endpoint of the bracketing interval
    EventRootFinding { callback: usize, t: f64 },
}

/// Change of the active algorithm at a step boundary
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmSwitch {
    pub t: f64,
    pub from: AlgorithmDescriptor,
    pub to: AlgorithmDescriptor,
}

/// Trajectory produced by the integrator
#[derive(Debug, Clone)]
pub struct Solution {
    /// Saved times in integration order
    pub t: Vec<f64>,
    /// Saved states, one per entry of `t`
    pub x: Vec<DVector<f64>>,
    /// Interpolants of every accepted step (empty when dense output is off)
    pub dense: DenseOutput,
    pub stats: Stats,
    pub retcode: ReturnCode,
    pub events: Vec<EventRecord>,
    pub warnings: Vec<Warning>,
    pub switches: Vec<AlgorithmSwitch>,
}

impl Solution {
    pub(crate) fn new() -> Self {
        Self {
            t: Vec::new(),
            x: Vec::new(),
            dense: DenseOutput::new(),
            stats: Stats::default(),
            retcode: ReturnCode::Success,
            events: Vec::new(),
            warnings: Vec::new(),
            switches: Vec::new(),
        }
    }

    pub(crate) fn save(&mut self, t: f64, x: &DVector<f64>) {
        self.t.push(t);
        self.x.push(x.clone());
    }

    /// Save `(t, x)` unless it repeats the last saved point
    pub(crate) fn save_unique(&mut self, t: f64, x: &DVector<f64>) {
        if self.t.last() == Some(&t) && self.x.last() == Some(x) {
            return;
        }
        self.save(t, x);
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Last saved point
    pub fn last(&self) -> Option<(f64, &DVector<f64>)> {
        Some((*self.t.last()?, self.x.last()?))
    }

    /// Solution at any time covered by the dense output
    pub fn evaluate(&self, t: f64) -> Result<DVector<f64>, InterpolationError> {
        self.dense.evaluate(t)
    }

    /// Saved trajectory of component `i`
    pub fn component(&self, i: usize) -> Vec<f64> {
        self.x.iter().map(|x| x[i]).collect()
    }

    /// Times at which callback `index` fired
    pub fn event_times(&self, index: usize) -> Vec<f64> {
        self.events
            .iter()
            .filter(|e| e.callback == index)
            .map(|e| e.t)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.retcode == ReturnCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_query() {
        let mut sol = Solution::new();
        assert!(sol.is_empty());
        sol.save(0.0, &DVector::from_vec(vec![1.0, 2.0]));
        sol.save(0.5, &DVector::from_vec(vec![3.0, 4.0]));
        assert_eq!(sol.len(), 2);
        assert_eq!(sol.component(1), vec![2.0, 4.0]);
        assert_eq!(sol.last().map(|(t, _)| t), Some(0.5));

        sol.save_unique(0.5, &DVector::from_vec(vec![3.0, 4.0]));
        assert_eq!(sol.len(), 2);
        sol.save_unique(0.5, &DVector::from_vec(vec![3.0, -4.0]));
        assert_eq!(sol.len(), 3);
        assert!(sol.evaluate(0.2).is_err());
    }

    #[test]
    fn test_event_times() {
        let mut sol = Solution::new();
        sol.events.push(EventRecord { callback: 0, t: 1.0 });
        sol.events.push(EventRecord { callback: 1, t: 1.5 });
        sol.events.push(EventRecord { callback: 0, t: 2.0 });
        assert_eq!(sol.event_times(0), vec![1.0, 2.0]);
        assert!(sol.event_times(2).is_empty());
    }
}
