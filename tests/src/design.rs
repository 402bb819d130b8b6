use std::path::PathBuf;
use std::sync::Arc;

use approx::assert_relative_eq;
use arcstr::ArcStr;
use test_log::test;

use cbd::corner::{generate, Dimension};
use cbd::dispatch::MeasureValue;
use cbd::execute::ThreadPool;
use cbd::problem::{Corners, Measure, Method, Requirement};
use cbd::validation::Cause;
use cbd::sink::{MemorySink, Record};
use cbd::{DesignLoop, Error};

use crate::paths::DATA_DIR;
use crate::shared::amplifier::{Amplifier, Grouping};
use crate::shared::{amplifier_problem, simulators};

fn corners(outcome: &cbd::Outcome, measure: &str) -> Vec<ArcStr> {
    outcome.corners[measure].clone()
}

#[test]
fn design_loop_optimizes_over_the_worst_corner_only() {
    let amp = Amplifier::new();
    let outcome = DesignLoop::new(amplifier_problem(), simulators(&amp))
        .run()
        .unwrap();

    // Pass 1 adds `slow`; pass 2 finds nothing new.
    assert_eq!(outcome.passes, 2);
    assert_eq!(corners(&outcome, "gain"), ["slow"]);
    assert!(corners(&outcome, "bw").is_empty());

    assert_relative_eq!(outcome.params["x"], 12.75, epsilon = 1e-9);
    assert!(outcome.aggregate.all_fulfilled());
    assert_relative_eq!(
        outcome.results["gain"]["fast"].as_ref().unwrap().as_scalar().unwrap(),
        19.125,
        epsilon = 1e-9
    );

    // Two full evaluations of both analyses, two optimizer evaluations of `slow_op`.
    assert_eq!(outcome.counts.get("op"), 6);
    assert_eq!(outcome.counts.get("ac"), 4);
    assert_eq!(amp.runs().iter().filter(|job| *job == "fast_op").count(), 2);
}

#[test]
fn method_none_only_evaluates_the_initial_point() {
    let mut problem = amplifier_problem();
    problem.options.method = Method::None;
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 1);
    assert_eq!(outcome.params["x"], 8.0);
    assert_eq!(outcome.counts.total(), 4);
    assert!(!outcome.aggregate.all_fulfilled());
    assert_eq!(
        outcome.aggregate.entries[0].worst_corner.as_deref(),
        Some("slow")
    );
}

#[test]
fn non_incremental_runs_optimize_over_every_corner() {
    let mut problem = amplifier_problem();
    problem.options.incremental_corners = false;
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_eq!(corners(&outcome, "gain"), ["fast", "slow"]);
    assert_relative_eq!(outcome.params["x"], 12.75, epsilon = 1e-9);
    assert_eq!(outcome.counts.get("op"), 8);
}

#[test]
fn unsatisfiable_requirements_end_at_the_bound() {
    let mut problem = amplifier_problem();
    problem.requirements[0] = Requirement::above(100.0);
    problem.options.max_iter = Some(10);
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_relative_eq!(outcome.params["x"], 20.0);
    assert!(!outcome.aggregate.all_fulfilled());
    assert!(outcome.counts.get("op") <= 2 + 10 + 2);
}

#[test]
fn failures_are_penalized_not_fatal() {
    let amp = Amplifier::new().failing("fast_ac");
    let mut problem = amplifier_problem();
    problem.options.method = Method::None;
    problem.requirements.insert(
        arcstr::literal!("bw"),
        Requirement {
            failure: Some(7.0),
            ..Requirement::above(1.0)
        },
    );
    let outcome = DesignLoop::new(problem, simulators(&amp)).run().unwrap();

    let bw = &outcome.aggregate.entries[1];
    assert_eq!(bw.measure, "bw");
    assert_eq!(bw.worst_corner.as_deref(), Some("fast"));
    assert_eq!(bw.failed_corners, ["fast"]);
    assert_eq!(bw.contribution, 7.0);
    assert_eq!(outcome.results["bw"]["fast"], None);
    assert!(matches!(
        outcome.results["bw"]["slow"],
        Some(MeasureValue::Scalar(_))
    ));
}

#[test]
fn passes_and_iterations_are_recorded() {
    let sink = Arc::new(MemorySink::new());
    DesignLoop::new(amplifier_problem(), simulators(&Amplifier::new()))
        .sink(sink.clone())
        .run()
        .unwrap();

    let roots = sink.children(None);
    assert_eq!(roots.len(), 3);
    let (first, Record::Pass(pass)) = &roots[0] else {
        panic!("expected a pass record, got {:?}", roots[0].1);
    };
    assert_eq!(pass.pass, 1);
    assert_eq!(pass.params["x"], 8.0);
    assert!(pass.corners["gain"].is_empty());

    let iterations: Vec<usize> = sink
        .children(Some(*first))
        .into_iter()
        .map(|(_, record)| match record {
            Record::Iteration(iteration) => iteration.iter,
            other => panic!("expected an iteration record, got {other:?}"),
        })
        .collect();
    assert_eq!(iterations, [1, 2]);

    let Record::Pass(second) = &roots[1].1 else {
        panic!("expected a pass record, got {:?}", roots[1].1);
    };
    assert_eq!(second.corners["gain"], ["slow"]);
    assert!(sink.children(Some(roots[1].0)).is_empty());

    let Record::Conclusion(conclusion) = &roots[2].1 else {
        panic!("expected a conclusion record, got {:?}", roots[2].1);
    };
    assert_eq!(conclusion.passes, 2);
    assert_eq!(conclusion.counts.total(), 10);
    assert_relative_eq!(conclusion.params["x"], 12.75, epsilon = 1e-9);
}

#[test]
fn configured_thread_pool_gives_the_same_design() {
    let root = PathBuf::from(DATA_DIR).join("cbd_config");
    let config = config::Config::new(root.join("projects"), root.join("home")).unwrap();
    assert_eq!(config.executor.workers, 2);

    let amp = Amplifier::new().grouping(Grouping::PerJob);
    let outcome = DesignLoop::new(amplifier_problem(), simulators(&amp))
        .config(&config)
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_relative_eq!(outcome.params["x"], 12.75, epsilon = 1e-9);
    assert_eq!(outcome.counts.total(), 10);
}

#[test]
fn explicit_executor_overrides_the_default() {
    let outcome = DesignLoop::new(amplifier_problem(), simulators(&Amplifier::new()))
        .executor(Arc::new(ThreadPool::new(0)))
        .run()
        .unwrap();

    assert_eq!(corners(&outcome, "gain"), ["slow"]);
}

#[test]
fn generated_corners_drive_the_design() {
    let generated = generate(
        &[Dimension::params("k", [1.5, 1.0]).aliases([Some("fast"), Some("slow")])],
        &[],
        "k",
        None,
    )
    .unwrap();
    let mut problem = amplifier_problem();
    problem.corners = Corners::Explicit(generated.corners);
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    assert_eq!(corners(&outcome, "gain"), ["k_slow"]);
    assert_relative_eq!(outcome.params["x"], 12.75, epsilon = 1e-9);
}

#[test]
fn parameter_collisions_fail_the_run() {
    let mut problem = amplifier_problem();
    problem.fixed_params.insert(arcstr::literal!("x"), 1.0);

    assert!(matches!(
        DesignLoop::new(problem, simulators(&Amplifier::new())).run(),
        Err(Error::ParamCollision { name }) if name == "x"
    ));
}

#[test]
fn explicit_corner_lists_limit_scoring_and_growth() {
    let mut problem = amplifier_problem();
    problem.measures[0] = Measure::new("op", "gain").corners(["fast"]);
    problem.params[0].init = 5.0;
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    // `slow` would violate the requirement but is not listed for `gain`.
    assert_eq!(outcome.passes, 2);
    assert_eq!(corners(&outcome, "gain"), ["fast"]);
    assert!(outcome.params["x"] * 1.5 >= 10.0);
    assert!(outcome.aggregate.all_fulfilled());
    assert_eq!(
        outcome.aggregate.entries[0].worst_corner.as_deref(),
        Some("fast")
    );
    assert!(outcome.results["gain"]["slow"].is_some());
}

#[test]
fn requirements_on_undefined_measures_fail_the_run() {
    let mut problem = amplifier_problem();
    problem.requirements = [(arcstr::literal!("gian"), Requirement::above(10.0))]
        .into_iter()
        .collect();
    let amp = Amplifier::new();

    match DesignLoop::new(problem, simulators(&amp)).run() {
        Err(Error::Compile(issues)) => assert!(issues.iter().any(|issue| matches!(
            issue.cause(),
            Cause::UndefinedMeasure { name } if name == "gian"
        ))),
        other => panic!("expected a compilation error, got {other:?}"),
    }
    assert!(amp.runs().is_empty());
}

#[test]
fn unusable_stopping_options_fail_the_run() {
    let mut problem = amplifier_problem();
    problem.options.step_tol = Some(0.0);
    problem.options.stop_when_all_satisfied = Some(false);
    assert!(matches!(
        DesignLoop::new(problem, simulators(&Amplifier::new())).run(),
        Err(Error::InvalidOption { name, .. }) if name == "step_tol"
    ));

    let mut problem = amplifier_problem();
    problem.options.max_iter = Some(0);
    assert!(matches!(
        DesignLoop::new(problem, simulators(&Amplifier::new())).run(),
        Err(Error::InvalidOption { name, .. }) if name == "max_iter"
    ));
}

#[test]
fn dependent_measures_grow_their_dependencies() {
    let mut problem = amplifier_problem();
    problem.measures.insert(
        arcstr::literal!("margin"),
        Measure::dependent("result[\"gain\"][corner] - 10").depends(["gain"]),
    );
    problem.requirements = [(arcstr::literal!("margin"), Requirement::above(0.0))]
        .into_iter()
        .collect();
    let sink = Arc::new(MemorySink::new());
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .sink(sink.clone())
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_eq!(corners(&outcome, "margin"), ["slow"]);
    assert_eq!(corners(&outcome, "gain"), ["slow"]);
    assert!(corners(&outcome, "bw").is_empty());
    assert!(outcome.aggregate.all_fulfilled());
    assert!(outcome.params["x"] >= 10.0);

    // Corner sets only ever grow from one pass to the next.
    let passes: Vec<_> = sink
        .children(None)
        .into_iter()
        .filter_map(|(_, record)| match record {
            Record::Pass(pass) => Some(pass.corners),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 2);
    for (before, after) in passes.iter().zip(&passes[1..]) {
        for (measure, corners) in before {
            assert!(corners.iter().all(|c| after[measure].contains(c)));
        }
    }
    assert!(passes[0]["margin"].is_empty());
    assert_eq!(passes[1]["gain"], ["slow"]);
}
