//! Integration engine
//!
//! The engine owns the integrator state and runs the loop
//!
//! ```text
//! selector -> stepper -> controller -> dense output -> callbacks -> selector ...
//! ```
//!
//! until the final time is reached, a callback terminates the run, the
//! cancellation token is set or a fatal error occurs. Every step attempt
//! starts from the last accepted point; a rejected attempt leaves the state
//! untouched apart from the step size and the rejection counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::composite::Algorithm;
use crate::config::IntegratorConfig;
use crate::controller::{land_on, StepController, StepTarget};
use crate::dense::Segment;
use crate::error::{IntegrationError, SolveFailure};
use crate::events::{run_affect, AffectOutcome, Callback, CallbackSet, Crossing};
use crate::norm::WeightedNorm;
use crate::problem::OdeProblem;
use crate::solution::{AlgorithmSwitch, EventRecord, ReturnCode, Solution, Stats, Warning};
use crate::solvers::{
    DenseLu, LinearSolver, NonlinearSolver, SolverError, StepContext, StepResult, Stepper,
};
use crate::state::IntegratorState;
use crate::utils::constants::SOL_SCALE_FAILURE;

/// Outcome of [`Integrator::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// An accepted step was taken and the integration goes on
    Continue,
    /// The integration is over
    Finished(ReturnCode),
}

/// Integrator of one trajectory
///
/// # Example
///
/// ```
/// use nalgebra::DVector;
/// use odeflow::prelude::*;
///
/// let problem = OdeProblem::from_fn(|x, _t| -x, DVector::from_vec(vec![1.0]), (0.0, 1.0));
/// let config = IntegratorConfig::new().with_tolerances(1e-8, 1e-8);
/// let sol = Integrator::new(&problem, RKDP54, config).unwrap().solve().unwrap();
///
/// let (_, x_end) = sol.last().unwrap();
/// assert!((x_end[0] - (-1.0_f64).exp()).abs() < 1e-6);
/// ```
pub struct Integrator<'p> {
    problem: &'p OdeProblem,
    algorithm: Algorithm,
    config: IntegratorConfig,
    norm: WeightedNorm,
    controller: StepController,
    steppers: Vec<Box<dyn Stepper>>,
    callbacks: CallbackSet,
    linear: Box<dyn LinearSolver>,
    nonlinear: Box<dyn NonlinearSolver>,
    state: IntegratorState,
    solution: Solution,
    stats: Stats,
    /// Step stops in integration order
    tstops: Vec<f64>,
    next_tstop: usize,
    /// Save times in integration order
    saveat: Vec<f64>,
    next_saveat: usize,
    cancel: Arc<AtomicBool>,
    started: bool,
    finished: Option<ReturnCode>,
}

impl<'p> Integrator<'p> {
    /// Validate the configuration and set up the state at the initial point
    pub fn new(
        problem: &'p OdeProblem,
        algorithm: impl Into<Algorithm>,
        config: IntegratorConfig,
    ) -> Result<Self, IntegrationError> {
        let algorithm = algorithm.into();
        config.validate(problem, algorithm.descriptors())?;

        let (t0, tf) = problem.t_span();
        let direction = problem.direction();
        let descriptors = algorithm.descriptors();
        let steppers = descriptors.iter().map(|alg| alg.build()).collect();

        let x0 = problem.initial().clone();
        let f0 = problem.system().rhs(&x0, t0);
        let state = IntegratorState::new(t0, x0, f0, tf, descriptors[0]);

        let in_order = |times: &[f64]| {
            let mut times = times.to_vec();
            times.sort_by(|a, b| (direction * a).total_cmp(&(direction * b)));
            times.dedup();
            times
        };

        Ok(Self {
            problem,
            norm: config.weighted_norm(),
            controller: StepController::new(config.controller, config.dt_min, config.dt_max),
            steppers,
            callbacks: CallbackSet::new(),
            linear: Box::new(DenseLu),
            nonlinear: Box::new(config.newton()),
            state,
            solution: Solution::new(),
            stats: Stats {
                nfev: 1,
                ..Stats::default()
            },
            tstops: in_order(&config.tstops),
            next_tstop: 0,
            saveat: in_order(&config.saveat),
            next_saveat: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            started: false,
            finished: None,
            algorithm,
            config,
        })
    }

    pub fn with_callbacks(mut self, callbacks: CallbackSet) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replace the dense LU solver used by implicit stages
    pub fn with_linear_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.linear = Box::new(solver);
        self
    }

    /// Replace the Newton solver used by implicit stages
    pub fn with_nonlinear_solver(mut self, solver: impl NonlinearSolver + 'static) -> Self {
        self.nonlinear = Box::new(solver);
        self
    }

    /// Flag checked before every step; setting it stops the integration
    /// with [`ReturnCode::Cancelled`]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> &IntegratorState {
        &self.state
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Take one accepted step, run the callbacks and pick the next algorithm
    pub fn step(&mut self) -> Result<StepStatus, IntegrationError> {
        if let Some(code) = self.finished {
            return Ok(StepStatus::Finished(code));
        }
        if !self.started {
            self.start();
        }
        if self.cancel.load(Ordering::Relaxed) {
            return Ok(self.finish(ReturnCode::Cancelled));
        }
        if self.state.is_finished() {
            return Ok(self.finish(ReturnCode::Success));
        }
        if self.state.accepted >= self.config.max_steps {
            return Err(IntegrationError::MaxStepsExceeded(self.config.max_steps));
        }

        let segment = self.advance()?;
        let outcome = self.handle_callbacks(&segment);
        if outcome.terminate {
            return Ok(self.finish(ReturnCode::Terminated));
        }

        self.select_next()?;

        if self.state.is_finished() {
            return Ok(self.finish(ReturnCode::Success));
        }
        Ok(StepStatus::Continue)
    }

    /// Integrate to the end of the time span
    pub fn solve(mut self) -> Result<Solution, SolveFailure> {
        loop {
            match self.step() {
                Ok(StepStatus::Continue) => {}
                Ok(StepStatus::Finished(_)) => return Ok(self.solution),
                Err(error) => {
                    log::warn!("Integration failed at t = {}: {}", self.state.t, error);
                    if self.config.save_end {
                        self.solution.save_unique(self.state.t, &self.state.x);
                    }
                    self.solution.stats = self.stats;
                    return Err(SolveFailure::new(error, self.solution));
                }
            }
        }
    }

    /// Everything integrated so far
    pub fn into_solution(mut self) -> Solution {
        self.solution.stats = self.stats;
        self.solution
    }

    fn start(&mut self) {
        self.started = true;
        let t0 = self.state.t;
        let direction = self.state.direction;
        self.state.dt = self.initial_dt();

        if self.config.save_start {
            self.solution.save_unique(t0, &self.state.x);
        }
        while let Some(&ts) = self.saveat.get(self.next_saveat) {
            if direction * (ts - t0) > 0.0 {
                break;
            }
            self.solution.save_unique(ts, &self.state.x);
            self.next_saveat += 1;
        }

        for (_, cb) in self.callbacks.iter_mut() {
            match cb {
                Callback::Continuous(c) => c.reset_at(&self.state.x, t0, false),
                Callback::Periodic(p) => p.arm(t0, direction),
                Callback::Discrete(_) => {}
            }
        }

        log::debug!(
            "Integrating with {} on [{}, {}], initial dt = {:.3e}",
            self.state.descriptor,
            t0,
            self.state.t_final,
            self.state.dt
        );
    }

    /// Starting step size (Hairer, Norsett & Wanner, II.4)
    fn initial_dt(&mut self) -> f64 {
        if let Some(dt) = self.config.dt_initial {
            return self.controller.clamp(dt);
        }

        let t0 = self.state.t;
        let span = (self.state.t_final - t0).abs();
        if span == 0.0 {
            return self.config.dt_min;
        }

        let x0 = &self.state.x;
        let f0 = &self.state.f;
        let d0 = self.norm.norm(x0, x0, x0);
        let d1 = self.norm.norm(f0, x0, x0);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(span);

        let x1 = x0 + (self.state.direction * h0) * f0;
        self.stats.nfev += 1;
        let f1 = self
            .problem
            .system()
            .rhs(&x1, t0 + self.state.direction * h0);
        let d2 = self.norm.norm(&(&f1 - f0), x0, x0) / h0;

        let order = self.steppers[self.state.active].order() as f64;
        let dmax = d1.max(d2);
        let h1 = if dmax <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / dmax).powf(1.0 / (order + 1.0))
        };

        let dt = (100.0 * h0).min(h1).min(span);
        if dt.is_finite() && dt > 0.0 {
            self.controller.clamp(dt)
        } else {
            self.controller.clamp(1e-6 * span)
        }
    }

    /// Nearest of the final time, the next tstop and the next periodic time
    fn next_stop(&mut self) -> f64 {
        let t = self.state.t;
        let direction = self.state.direction;
        while let Some(&s) = self.tstops.get(self.next_tstop) {
            if direction * (s - t) > 0.0 {
                break;
            }
            self.next_tstop += 1;
        }

        let tstop = self.tstops.get(self.next_tstop).copied();
        let periodic = self.callbacks.next_stop(t, direction);
        tstop
            .into_iter()
            .chain(periodic)
            .fold(self.state.t_final, |stop, s| {
                if direction * (s - stop) < 0.0 {
                    s
                } else {
                    stop
                }
            })
    }

    /// Attempt steps until one is accepted
    fn advance(&mut self) -> Result<Segment, IntegrationError> {
        let active = self.state.active;
        let adaptive = self.config.adaptive && self.steppers[active].is_adaptive();

        loop {
            let stop = self.next_stop();
            let dt_proposed = self.state.dt;
            let target = land_on(self.state.t, dt_proposed, self.state.direction, stop);

            let attempt = {
                let mut ctx = StepContext {
                    system: self.problem.system(),
                    norm: &self.norm,
                    jacobian: self.config.jacobian,
                    linear: self.linear.as_ref(),
                    nonlinear: self.nonlinear.as_ref(),
                    stats: &mut self.stats,
                };
                self.steppers[active].attempt_step(&mut ctx, &self.state, target.h)
            };

            let result = match attempt {
                Ok(result) => result,
                Err(SolverError::MissingJacobian) => return Err(IntegrationError::MissingJacobian),
                Err(err) => {
                    log::debug!(
                        "Step from t = {:.6e} with h = {:.3e} failed: {}",
                        self.state.t,
                        target.h,
                        err
                    );
                    self.reject(target.h.abs() * SOL_SCALE_FAILURE, err.to_string())?;
                    continue;
                }
            };

            self.state.last_error = Some(result.error_norm);
            if !adaptive {
                let dt_next = if self.config.adaptive {
                    self.state.dt
                } else {
                    self.config
                        .dt_initial
                        .map_or(self.state.dt, |dt| self.controller.clamp(dt))
                };
                return Ok(self.accept(result, target, dt_next));
            }

            self.state.dt = target.h.abs();
            let stepper = &self.steppers[active];
            let max_growth = stepper.max_growth();
            let decision = self.controller.decide_limited(
                result.error_norm,
                stepper.error_order(),
                &self.state,
                max_growth,
            );
            if decision.accept {
                // Landing on a stop cuts the step, not the proposal behind it
                let taken = self.state.dt;
                let dt_next = if target.landed && decision.dt_next >= taken {
                    decision.dt_next.max(dt_proposed.min(taken * max_growth))
                } else {
                    decision.dt_next
                };
                return Ok(self.accept(result, target, dt_next));
            }

            log::debug!(
                "Rejected step from t = {:.6e} with h = {:.3e}: error {:.3e}",
                self.state.t,
                target.h,
                result.error_norm
            );
            self.reject(
                decision.dt_next,
                format!("error norm {:.3e}", result.error_norm),
            )?;
        }
    }

    fn reject(&mut self, dt_next: f64, cause: String) -> Result<(), IntegrationError> {
        self.state.rejected += 1;
        self.state.consecutive_rejections += 1;
        self.stats.rejected += 1;

        if self.state.consecutive_rejections >= self.config.max_rejections {
            log::warn!(
                "Giving up at t = {} after {} consecutive rejections ({})",
                self.state.t,
                self.state.consecutive_rejections,
                cause
            );
            return Err(IntegrationError::ConvergenceFailure {
                t: self.state.t,
                rejections: self.state.consecutive_rejections,
                cause,
            });
        }

        self.state.dt = self.controller.clamp(dt_next);
        Ok(())
    }

    fn accept(&mut self, result: StepResult, target: StepTarget, dt_next: f64) -> Segment {
        let StepResult {
            x_new,
            error_norm,
            f_new,
            interpolation,
            stiffness,
            ..
        } = result;
        let t1 = target.t_new;

        let f_new = match f_new {
            Some(f) => f,
            None => {
                self.stats.nfev += 1;
                self.problem.system().rhs(&x_new, t1)
            }
        };
        let segment = Segment::build(
            self.state.t,
            &self.state.x,
            &self.state.f,
            t1,
            &x_new,
            &f_new,
            interpolation,
        );

        self.state.consecutive_rejections = 0;
        self.state.accepted += 1;
        self.stats.accepted += 1;
        self.state.record_error(error_norm);
        if let Some(estimate) = stiffness {
            self.state.update_stiffness(estimate);
        }

        let stepper = &mut self.steppers[self.state.active];
        stepper.accept(t1, &x_new, target.h);
        self.state.order = stepper.order();
        self.state.error_order = stepper.error_order();
        self.state.advance(t1, x_new, f_new);
        self.state.dt = dt_next;

        log::trace!(
            "t = {:.6e}, h = {:.3e}, err = {:.3e}",
            t1,
            target.h,
            error_norm
        );

        if self.config.dense {
            self.solution.dense.push(segment.clone());
        }
        segment
    }

    /// Move the state back to an event inside the last step
    fn rewind_to(&mut self, segment: &Segment, t: f64) {
        let x = segment.evaluate(t);
        self.stats.nfev += 1;
        let f = self.problem.system().rhs(&x, t);
        if self.config.dense {
            self.solution.dense.truncate_last(t);
        }
        self.state.rewind(t, x, f);
        for stepper in &mut self.steppers {
            stepper.reset();
        }
        log::debug!("Rewound to event at t = {:.6e}", t);
    }

    /// Locate events in the accepted step, save output and run affects
    fn handle_callbacks(&mut self, segment: &Segment) -> AffectOutcome {
        let direction = self.state.direction;
        let mut outcome = AffectOutcome::default();

        let mut crossings: Vec<(usize, Crossing, f64)> = Vec::new();
        for (i, cb) in self.callbacks.iter_mut() {
            if let Callback::Continuous(c) = cb {
                if let Some(crossing) = c.detect(segment) {
                    crossings.push((i, crossing, c.tolerance()));
                }
            }
        }

        // Crossings within tolerance of the earliest one fire together
        let mut fired: Vec<(usize, Crossing)> = Vec::new();
        let t_event = crossings
            .iter()
            .map(|(_, c, _)| c.t)
            .min_by(|a, b| (direction * a).total_cmp(&(direction * b)));
        if let Some(t_event) = t_event {
            for (i, crossing, tolerance) in crossings {
                if direction * (crossing.t - t_event) <= tolerance {
                    fired.push((i, crossing));
                } else if let Some(Callback::Continuous(c)) = self.callbacks.get_mut(i) {
                    c.settle();
                }
            }
            if t_event != self.state.t {
                self.rewind_to(segment, t_event);
            }
        }

        let t = self.state.t;
        let step = (t - segment.t_start()).abs();

        while let Some(&ts) = self.saveat.get(self.next_saveat) {
            if direction * (ts - t) > 0.0 {
                break;
            }
            let xs = if ts == t {
                self.state.x.clone()
            } else {
                segment.evaluate(ts)
            };
            self.solution.save_unique(ts, &xs);
            self.next_saveat += 1;
        }
        if self.config.save_everystep && self.saveat.is_empty() && !self.state.is_finished() {
            self.solution.save_unique(t, &self.state.x);
        }

        for (i, crossing) in &fired {
            if !crossing.converged {
                log::warn!(
                    "Root finding for callback {} did not converge, event placed at t = {:.6e}",
                    i,
                    t
                );
                self.solution
                    .warnings
                    .push(Warning::EventRootFinding { callback: *i, t });
            }
            self.solution.events.push(EventRecord { callback: *i, t });

            if let Some(Callback::Continuous(c)) = self.callbacks.get_mut(*i) {
                let (before, after) = c.save_positions;
                if let Some(affect) = c.affect_for(crossing) {
                    if before {
                        self.solution.save_unique(t, &self.state.x);
                    }
                    let result = run_affect(affect, &mut self.state, step);
                    if after && result.state_changed() {
                        self.solution.save_unique(self.state.t, &self.state.x);
                    }
                    outcome.merge(result);
                }
                c.settle();
            }
        }

        for (i, cb) in self.callbacks.iter_mut() {
            let (affect, (before, after)) = match cb {
                Callback::Discrete(d) if d.is_triggered(&self.state.x, t) => {
                    let positions = d.save_positions;
                    (d.affect(), positions)
                }
                Callback::Periodic(p) if p.is_due(t, direction) => {
                    p.arm(t, direction);
                    let positions = p.save_positions;
                    (p.affect(), positions)
                }
                _ => continue,
            };

            if before {
                self.solution.save_unique(t, &self.state.x);
            }
            let result = run_affect(affect, &mut self.state, step);
            if after && result.state_changed() {
                self.solution.save_unique(t, &self.state.x);
            }
            self.solution.events.push(EventRecord { callback: i, t });
            outcome.merge(result);
        }

        if outcome.state_changed() {
            self.stats.nfev += 1;
            let f = self.problem.system().rhs(&self.state.x, t);
            let x = self.state.x.clone();
            for stepper in &mut self.steppers {
                if outcome.modified {
                    stepper.reset();
                } else {
                    stepper.rebase(t, &x);
                }
            }
            self.state.rewind(t, x, f);
        }

        for (i, cb) in self.callbacks.iter_mut() {
            if let Callback::Continuous(c) = cb {
                let just_fired = fired.iter().any(|(j, _)| *j == i);
                c.reset_at(&self.state.x, t, just_fired);
            }
        }

        if let Some(dt) = outcome.next_dt {
            self.state.dt = self.controller.clamp(dt);
        }
        outcome
    }

    /// Ask the selector for the next algorithm and switch at this boundary
    fn select_next(&mut self) -> Result<(), IntegrationError> {
        if !self.algorithm.is_composite() {
            return Ok(());
        }

        let available = self.steppers.len();
        let index = self.algorithm.select(&self.state);
        if index >= available {
            return Err(IntegrationError::InvalidSelection { index, available });
        }

        let active = self.state.active;
        if index != active {
            let descriptors = self.algorithm.descriptors();
            let (from, to) = (descriptors[active], descriptors[index]);
            log::debug!("Switching {} -> {} at t = {:.6e}", from, to, self.state.t);
            self.solution.switches.push(AlgorithmSwitch {
                t: self.state.t,
                from,
                to,
            });

            let stepper = &mut self.steppers[index];
            if stepper.is_multistep() {
                stepper.reset();
            }
            self.state.active = index;
            self.state.descriptor = to;
            self.state.order = stepper.order();
            self.state.error_order = stepper.error_order();
        }
        Ok(())
    }

    fn finish(&mut self, code: ReturnCode) -> StepStatus {
        if self.config.save_end {
            self.solution.save_unique(self.state.t, &self.state.x);
        }
        self.solution.retcode = code;
        self.solution.stats = self.stats;
        self.finished = Some(code);

        log::debug!(
            "Finished at t = {} ({:?}): {} accepted, {} rejected, {} rhs evaluations",
            self.state.t,
            code,
            self.stats.accepted,
            self.stats.rejected,
            self.stats.nfev
        );
        StepStatus::Finished(code)
    }
}

/// Integrate `problem` with `algorithm` under `config`
pub fn solve(
    problem: &OdeProblem,
    algorithm: impl Into<Algorithm>,
    config: IntegratorConfig,
) -> Result<Solution, SolveFailure> {
    solve_with_callbacks(problem, algorithm, config, CallbackSet::new())
}

/// Integrate `problem` with callbacks attached
pub fn solve_with_callbacks(
    problem: &OdeProblem,
    algorithm: impl Into<Algorithm>,
    config: IntegratorConfig,
    callbacks: CallbackSet,
) -> Result<Solution, SolveFailure> {
    Integrator::new(problem, algorithm, config)
        .map_err(|error| SolveFailure::new(error, Solution::new()))?
        .with_callbacks(callbacks)
        .solve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::CompositeAlgorithm;
    use crate::events::{ContinuousCallback, DiscreteCallback, PeriodicCallback};
    use crate::solvers::{BDF2, RK4, RKDP54, RKF45};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn decay(t_span: (f64, f64)) -> OdeProblem {
        OdeProblem::from_fn(|x, _| -x, DVector::from_vec(vec![1.0]), t_span)
    }

    #[test]
    fn test_lands_on_final_time() {
        let problem = decay((0.0, 1.0));
        let sol = solve(&problem, RKDP54, IntegratorConfig::new()).unwrap();
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_eq!(*sol.t.first().unwrap(), 0.0);
        assert_eq!(*sol.t.last().unwrap(), 1.0);
        assert!(sol.t.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(sol.stats.accepted, sol.dense.len());
    }

    #[test]
    fn test_fixed_step_grid() {
        let problem = decay((0.0, 1.0));
        let sol = solve(&problem, RK4, IntegratorConfig::fixed_step(0.1)).unwrap();
        assert_eq!(sol.len(), 11);
        assert_eq!(sol.stats.rejected, 0);
        for (i, t) in sol.t.iter().enumerate() {
            assert_relative_eq!(*t, 0.1 * i as f64, epsilon = 1e-12);
        }
        assert_relative_eq!(sol.x[10][0], (-1.0_f64).exp(), epsilon = 1e-5);
    }

    #[test]
    fn test_tstops_are_hit_exactly() {
        let problem = decay((0.0, 2.0));
        let config = IntegratorConfig::new().with_tstops(vec![0.3, 1.7]);
        let sol = solve(&problem, RKF45, config).unwrap();
        assert!(sol.t.contains(&0.3));
        assert!(sol.t.contains(&1.7));
    }

    #[test]
    fn test_saveat_only() {
        let problem = decay((0.0, 1.0));
        let config = IntegratorConfig::new()
            .with_saveat(vec![0.25, 0.5, 0.75])
            .with_tolerances(1e-9, 1e-9);
        let sol = solve(&problem, RKDP54, config).unwrap();
        assert_eq!(sol.t, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        for (t, x) in sol.t.iter().zip(&sol.x) {
            assert_relative_eq!(x[0], (-t).exp(), epsilon = 1e-7);
        }
    }

    #[test]
    fn test_nan_rhs_hits_rejection_ceiling() {
        let problem = OdeProblem::from_fn(
            |x: &DVector<f64>, _| x.map(|_| f64::NAN),
            DVector::from_vec(vec![1.0]),
            (0.0, 1.0),
        );
        let config = IntegratorConfig::new().with_max_rejections(7);
        let failure = solve(&problem, RKDP54, config).unwrap_err();
        assert!(matches!(
            failure.error,
            IntegrationError::ConvergenceFailure { rejections: 7, .. }
        ));
        assert_eq!(failure.partial.stats.rejected, 7);
        assert_eq!(failure.partial.stats.accepted, 0);
    }

    #[test]
    fn test_max_steps() {
        let problem = decay((0.0, 1.0));
        let config = IntegratorConfig::fixed_step(0.01).with_max_steps(10);
        let failure = solve(&problem, RK4, config).unwrap_err();
        assert_eq!(failure.error, IntegrationError::MaxStepsExceeded(10));
        assert_eq!(failure.partial.stats.accepted, 10);
    }

    #[test]
    fn test_cancellation() {
        let problem = decay((0.0, 1.0));
        let mut integrator = Integrator::new(&problem, RK4, IntegratorConfig::fixed_step(0.1)).unwrap();
        assert_eq!(integrator.step().unwrap(), StepStatus::Continue);
        integrator.cancel_token().store(true, Ordering::Relaxed);
        assert_eq!(
            integrator.step().unwrap(),
            StepStatus::Finished(ReturnCode::Cancelled)
        );
        assert_relative_eq!(integrator.state().t(), 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_event_rewinds_and_terminates() {
        let problem = decay((0.0, 5.0));
        let callbacks = CallbackSet::new().with(crate::events::terminate_when(
            |x: &DVector<f64>, _| x[0] - 0.5,
        ));
        let sol = solve_with_callbacks(&problem, RKDP54, IntegratorConfig::new(), callbacks).unwrap();
        assert_eq!(sol.retcode, ReturnCode::Terminated);
        let (t_end, _) = sol.last().unwrap();
        assert_relative_eq!(t_end, 2.0_f64.ln(), epsilon = 1e-6);
        assert_eq!(sol.event_times(0).len(), 1);
        assert_relative_eq!(sol.dense.span().unwrap().1, t_end);
    }

    #[test]
    fn test_state_modifying_callbacks() {
        let problem = OdeProblem::from_fn(|_, _| DVector::from_vec(vec![1.0]), DVector::zeros(1), (0.0, 1.0));
        let callbacks = CallbackSet::new()
            .with(ContinuousCallback::new(
                |x: &DVector<f64>, _| x[0] - 0.5,
                |ctx| ctx.state_mut()[0] = 0.0,
            ))
            .with(PeriodicCallback::at(vec![0.8], |ctx| ctx.state_mut()[0] += 10.0))
            .with(DiscreteCallback::new(|x: &DVector<f64>, _| x[0] > 100.0, |ctx| ctx.terminate()));
        let sol = solve_with_callbacks(&problem, BDF2, IntegratorConfig::new(), callbacks).unwrap();

        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_relative_eq!(sol.event_times(0)[0], 0.5, epsilon = 1e-8);
        assert_eq!(sol.event_times(1), vec![0.8]);
        assert!(sol.event_times(2).is_empty());
        // x = 0 at 0.5, 0.3 at 0.8, +10, then 0.2 more
        assert_relative_eq!(sol.x.last().unwrap()[0], 10.5, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_selection() {
        let problem = decay((0.0, 1.0));
        let alg = CompositeAlgorithm::new(vec![RK4, RKDP54], |_| 5);
        let failure = solve(&problem, alg, IntegratorConfig::new()).unwrap_err();
        assert_eq!(
            failure.error,
            IntegrationError::InvalidSelection {
                index: 5,
                available: 2
            }
        );
    }
}
