//! Engine-level behaviour: configuration, failure modes, output selection,
//! cancellation and concurrent trajectories.

use approx::assert_relative_eq;
use nalgebra::DVector;
use odeflow::prelude::*;
use std::sync::atomic::Ordering;

fn decay(rate: f64) -> OdeProblem {
    OdeProblem::from_fn(move |x, _t| x * -rate, DVector::from_vec(vec![1.0]), (0.0, 1.0))
}

#[test]
fn test_config_serde_round_trip() {
    let config = IntegratorConfig::new()
        .with_abstol(vec![1e-8, 1e-6])
        .with_reltol(1e-5)
        .with_norm(ErrorNorm::Max)
        .with_saveat(vec![0.5, 1.0])
        .with_jacobian(JacobianMode::FiniteDifference)
        .with_controller(PiController::proportional());

    let json = serde_json::to_string(&config).unwrap();
    let back: IntegratorConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_config_defaults_from_partial_json() {
    let config: IntegratorConfig =
        serde_json::from_str(r#"{ "reltol": 1e-9, "max_rejections": 5 }"#).unwrap();
    assert_eq!(config.reltol, Tolerance::Scalar(1e-9));
    assert_eq!(config.max_rejections, 5);
    assert_eq!(config.abstol, IntegratorConfig::default().abstol);
    assert!(config.adaptive);
}

#[test]
fn test_invalid_config_is_reported_before_stepping() {
    let problem = decay(1.0);
    for config in [
        IntegratorConfig::new().with_abstol(-1.0),
        IntegratorConfig::new().with_abstol(vec![1e-6, 1e-6]),
        IntegratorConfig::new().with_dt_min(1.0).with_dt_max(0.1),
        IntegratorConfig::new().with_adaptive(false),
        IntegratorConfig::new().with_saveat(vec![2.0]),
    ] {
        let failure = solve(&problem, RKDP54, config).unwrap_err();
        assert!(matches!(failure.error, IntegrationError::InvalidConfig(_)));
        assert!(failure.partial.is_empty());
        assert_eq!(failure.partial.stats.nfev, 0);
    }
}

#[test]
fn test_nan_rhs_fails_after_max_rejections() {
    let problem = OdeProblem::from_fn(
        |x: &DVector<f64>, t| if t > 0.5 { x.map(|_| f64::NAN) } else { -x },
        DVector::from_vec(vec![1.0]),
        (0.0, 1.0),
    );
    let config = IntegratorConfig::new().with_max_rejections(12);
    let failure = solve(&problem, RKDP54, config).unwrap_err();

    match failure.error {
        IntegrationError::ConvergenceFailure { t, rejections, .. } => {
            assert_eq!(rejections, 12);
            assert!(t <= 0.5);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // Everything up to the last accepted step survives
    let partial = failure.partial;
    assert!(partial.stats.accepted > 0);
    let (t_last, x_last) = partial.last().unwrap();
    assert!(t_last <= 0.5);
    assert_relative_eq!(x_last[0], (-t_last).exp(), epsilon = 1e-3);
}

#[test]
fn test_max_steps_exceeded() {
    let config = IntegratorConfig::new().with_dt_max(1e-3).with_max_steps(100);
    let failure = solve(&decay(1.0), RKDP54, config).unwrap_err();
    assert_eq!(failure.error, IntegrationError::MaxStepsExceeded(100));
}

#[test]
fn test_landing_on_tstop_keeps_step_size() {
    let problem = OdeProblem::from_fn(
        |x: &DVector<f64>, _t| DVector::from_vec(vec![x[1], -x[0]]),
        DVector::from_vec(vec![1.0, 0.0]),
        (0.0, 10.0),
    );
    let config = IntegratorConfig::new().with_tolerances(1e-8, 1e-8);
    let reference = solve(&problem, RKDP54, config.clone()).unwrap();

    // A stop just past a mid-run step point forces a tiny landing step
    let k = reference.len() / 2;
    let h_ref = reference.t[k + 1] - reference.t[k];
    let tstop = reference.t[k] + 1e-3 * h_ref;
    let sol = solve(&problem, RKDP54, config.with_tstops(vec![tstop])).unwrap();

    let i = sol.t.iter().position(|&t| t == tstop).unwrap();
    assert_eq!(&sol.t[..i], &reference.t[..=k]);
    let h_next = sol.t[i + 1] - sol.t[i];
    assert!(h_next > 0.5 * h_ref, "step after landing {:e}, before {:e}", h_next, h_ref);
    assert!(sol.stats.accepted <= reference.stats.accepted + 3);
}

#[test]
fn test_saveat_and_dense_switches() {
    let config = IntegratorConfig::new()
        .with_saveat(vec![0.1, 0.2, 0.3])
        .with_save_start(false)
        .with_save_end(false)
        .with_dense(false)
        .with_tolerances(1e-10, 1e-10);
    let sol = solve(&decay(2.0), RKDP54, config).unwrap();

    assert_eq!(sol.t, vec![0.1, 0.2, 0.3]);
    for (t, x) in sol.t.iter().zip(&sol.x) {
        assert_relative_eq!(x[0], (-2.0 * t).exp(), epsilon = 1e-8);
    }
    assert!(sol.dense.is_empty());
    assert!(sol.evaluate(0.5).is_err());
}

#[test]
fn test_save_everystep_off() {
    let config = IntegratorConfig::new().with_save_everystep(false);
    let sol = solve(&decay(1.0), RKDP54, config).unwrap();
    assert_eq!(sol.t, vec![0.0, 1.0]);
    assert!(sol.stats.accepted > 1);
    assert_eq!(sol.dense.len(), sol.stats.accepted);
}

#[test]
fn test_zero_length_span() {
    let problem = OdeProblem::from_fn(|x, _t| -x, DVector::from_vec(vec![3.0]), (1.0, 1.0));
    let sol = solve(&problem, RKDP54, IntegratorConfig::new()).unwrap();
    assert!(sol.is_success());
    assert_eq!(sol.t, vec![1.0]);
    assert_eq!(sol.stats.accepted, 0);
}

#[test]
fn test_cancel_before_start() {
    let problem = decay(1.0);
    let integrator = Integrator::new(&problem, RKDP54, IntegratorConfig::new()).unwrap();
    integrator.cancel_token().store(true, Ordering::Relaxed);

    let sol = integrator.solve().unwrap();
    assert_eq!(sol.retcode, ReturnCode::Cancelled);
    assert_eq!(sol.t, vec![0.0]);
    assert_eq!(sol.stats.accepted, 0);
}

#[test]
fn test_step_by_step_matches_solve() {
    let problem = decay(1.5);
    let config = IntegratorConfig::new().with_tolerances(1e-8, 1e-8);
    let reference = solve(&problem, RKF45, config.clone()).unwrap();

    let mut integrator = Integrator::new(&problem, RKF45, config).unwrap();
    let mut steps = 0;
    loop {
        match integrator.step().unwrap() {
            StepStatus::Continue => steps += 1,
            StepStatus::Finished(code) => {
                assert_eq!(code, ReturnCode::Success);
                break;
            }
        }
    }
    // Stepping after the end is a no-op
    assert_eq!(
        integrator.step().unwrap(),
        StepStatus::Finished(ReturnCode::Success)
    );

    let sol = integrator.into_solution();
    assert_eq!(steps + 1, reference.stats.accepted);
    assert_eq!(sol.t, reference.t);
    assert_eq!(sol.x, reference.x);
}

#[test]
fn test_independent_trajectories_in_parallel() {
    let problem = decay(1.0);
    let tolerances = [1e-4, 1e-6, 1e-8, 1e-10];

    let finals: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = tolerances
            .iter()
            .map(|&tol| {
                let problem = &problem;
                scope.spawn(move || {
                    let config = IntegratorConfig::new().with_tolerances(tol, tol);
                    let sol = solve(problem, RKDP54, config).unwrap();
                    sol.last().unwrap().1[0]
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for x in finals {
        assert_relative_eq!(x, (-1.0_f64).exp(), epsilon = 1e-3);
    }
}

#[test]
fn test_algorithm_lookup_by_name() {
    let problem = decay(1.0);
    for name in ["rk4", "RKDP54", "rodas4", "bdf2"] {
        let alg = AlgorithmDescriptor::from_name(name).unwrap();
        let config = if alg.is_adaptive() {
            IntegratorConfig::new().with_tolerances(1e-8, 1e-8)
        } else {
            IntegratorConfig::fixed_step(0.01)
        };
        let sol = solve(&problem, alg, config).unwrap();
        assert_relative_eq!(sol.last().unwrap().1[0], (-1.0_f64).exp(), epsilon = 1e-3);
    }
}
