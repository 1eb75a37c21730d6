//! Composite algorithms
//!
//! A composite holds several descriptors and a selector choosing which one
//! takes the next step. The selector sees the integrator state read-only and
//! runs once per accepted step, so a switch only ever happens at a step
//! boundary.

use std::fmt;
use std::sync::Arc;

use crate::solvers::AlgorithmDescriptor;
use crate::state::IntegratorState;

/// Pure function from integrator state to the index of the next algorithm
pub type Selector = dyn Fn(&IntegratorState) -> usize + Send + Sync;

/// Several algorithms behind one selector
#[derive(Clone)]
pub struct CompositeAlgorithm {
    algorithms: Vec<AlgorithmDescriptor>,
    selector: Arc<Selector>,
}

impl CompositeAlgorithm {
    /// # Panics
    ///
    /// Panics if `algorithms` is empty.
    pub fn new<S>(algorithms: Vec<AlgorithmDescriptor>, selector: S) -> Self
    where
        S: Fn(&IntegratorState) -> usize + Send + Sync + 'static,
    {
        assert!(!algorithms.is_empty(), "A composite needs at least one algorithm");
        Self {
            algorithms,
            selector: Arc::new(selector),
        }
    }

    /// Switch from `nonstiff` to `stiff` when the stiffness estimate exceeds
    /// `threshold`, and back once it drops below `threshold / 2`
    pub fn stiffness_switch(
        nonstiff: AlgorithmDescriptor,
        stiff: AlgorithmDescriptor,
        threshold: f64,
    ) -> Self {
        Self::new(vec![nonstiff, stiff], stiffness_selector(threshold))
    }

    pub fn algorithms(&self) -> &[AlgorithmDescriptor] {
        &self.algorithms
    }

    pub fn select(&self, state: &IntegratorState) -> usize {
        (self.selector)(state)
    }
}

impl fmt::Debug for CompositeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAlgorithm")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Selector always returning `index`
pub fn fixed(index: usize) -> impl Fn(&IntegratorState) -> usize + Send + Sync + Clone {
    move |_| index
}

/// Two-algorithm selector with hysteresis on the stiffness estimate
///
/// Index 0 is the non-stiff method, index 1 the stiff one.
pub fn stiffness_selector(threshold: f64) -> impl Fn(&IntegratorState) -> usize + Send + Sync + Clone {
    move |state| {
        let active = state.active_index();
        match state.stiffness() {
            Some(s) if active == 0 && s > threshold => 1,
            Some(s) if active == 1 && s < 0.5 * threshold => 0,
            _ => active,
        }
    }
}

/// Algorithm handed to the integrator
#[derive(Debug, Clone)]
pub enum Algorithm {
    Single(AlgorithmDescriptor),
    Composite(CompositeAlgorithm),
}

impl Algorithm {
    pub fn descriptors(&self) -> &[AlgorithmDescriptor] {
        match self {
            Self::Single(alg) => std::slice::from_ref(alg),
            Self::Composite(c) => c.algorithms(),
        }
    }

    /// Index of the algorithm for the next step
    pub fn select(&self, state: &IntegratorState) -> usize {
        match self {
            Self::Single(_) => 0,
            Self::Composite(c) => c.select(state),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }
}

impl From<AlgorithmDescriptor> for Algorithm {
    fn from(alg: AlgorithmDescriptor) -> Self {
        Self::Single(alg)
    }
}

impl From<CompositeAlgorithm> for Algorithm {
    fn from(c: CompositeAlgorithm) -> Self {
        Self::Composite(c)
    }
}
