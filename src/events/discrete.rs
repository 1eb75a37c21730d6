//! Discrete callbacks, checked once after every accepted step

use nalgebra::DVector;

use super::base::{AffectContext, AffectFn};

type DiscreteCondition = dyn Fn(&DVector<f64>, f64) -> bool + Send + Sync;

/// Callback whose condition is checked at the end of every accepted step
pub struct DiscreteCallback {
    condition: Box<DiscreteCondition>,
    affect: Box<AffectFn>,
    pub(crate) save_positions: (bool, bool),
}

impl DiscreteCallback {
    /// Run `affect` after every accepted step where `condition` holds
    pub fn new<C, A>(condition: C, affect: A) -> Self
    where
        C: Fn(&DVector<f64>, f64) -> bool + Send + Sync + 'static,
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self {
            condition: Box::new(condition),
            affect: Box::new(affect),
            save_positions: (false, false),
        }
    }

    /// Run `affect` after every accepted step
    pub fn always<A>(affect: A) -> Self
    where
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self::new(|_: &DVector<f64>, _| true, affect)
    }

    pub fn with_save_positions(mut self, before: bool, after: bool) -> Self {
        self.save_positions = (before, after);
        self
    }

    pub fn is_triggered(&self, x: &DVector<f64>, t: f64) -> bool {
        (self.condition)(x, t)
    }

    pub(crate) fn affect(&mut self) -> &mut AffectFn {
        self.affect.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::base::run_affect;
    use crate::solvers::RK4;
    use crate::state::IntegratorState;

    #[test]
    fn test_condition_and_affect() {
        let mut cb = DiscreteCallback::new(
            |x: &DVector<f64>, _t| x[0] > 1.0,
            |ctx: &mut AffectContext<'_>| ctx.state_mut()[0] = 0.0,
        );
        let x = DVector::from_vec(vec![2.0]);
        assert!(cb.is_triggered(&x, 0.0));
        assert!(!cb.is_triggered(&DVector::from_vec(vec![0.5]), 0.0));

        let mut state = IntegratorState::new(0.0, x.clone(), x, 1.0, RK4);
        let outcome = run_affect(cb.affect(), &mut state, 0.1);
        assert!(outcome.modified);
        assert_eq!(state.x()[0], 0.0);
    }
}
