use std::sync::Arc;

use approx::assert_relative_eq;
use arcstr::ArcStr;
use test_log::test;

use cbd::compile::{CompileOptions, Definitions, JobGraph};
use cbd::context::RunContext;
use cbd::dispatch::{Dispatcher, Evaluation, MeasureValue};
use cbd::evaluator::ExprEvaluator;
use cbd::execute::{Executor, Sequential, ThreadPool};
use cbd::problem::{Analysis, Head, Measure, Problem, Variable};
use cbd::simulator::Simulators;
use cbd::validation::Cause;
use cbd::Error;

use crate::shared::amplifier::{Amplifier, Grouping};
use crate::shared::{amplifier_problem, params, simulators};

fn dispatcher(
    problem: &Problem,
    simulators: &Simulators,
    active: &[&str],
    executor: Arc<dyn Executor>,
) -> cbd::Result<(Dispatcher, RunContext)> {
    let active: Vec<ArcStr> = active.iter().copied().map(ArcStr::from).collect();
    let graph = JobGraph::compile(
        &Definitions::from_problem(problem),
        &problem.measures,
        &active,
        &CompileOptions::default(),
    )?;
    let ctx = RunContext::from_problem(problem);
    let dispatcher = Dispatcher::new(
        graph,
        &problem.measures,
        &problem.heads,
        simulators,
        &ExprEvaluator,
        executor,
        &ctx,
    )?;
    Ok((dispatcher, ctx))
}

fn evaluate(problem: &Problem, amp: &Amplifier, active: &[&str], x: f64) -> Evaluation {
    let (dispatcher, ctx) =
        dispatcher(problem, &simulators(amp), active, Arc::new(Sequential)).unwrap();
    dispatcher.evaluate(&params([("x", x)]), &ctx).unwrap()
}

fn scalar(evaluation: &Evaluation, measure: &str, corner: &str) -> Option<f64> {
    evaluation.results[measure][corner]
        .as_ref()
        .and_then(MeasureValue::as_scalar)
}

#[test]
fn measures_are_evaluated_in_every_corner() {
    let amp = Amplifier::new();
    let evaluation = evaluate(&amplifier_problem(), &amp, &["gain", "bw"], 8.0);

    assert_eq!(scalar(&evaluation, "gain", "fast"), Some(12.0));
    assert_eq!(scalar(&evaluation, "gain", "slow"), Some(8.0));
    assert_relative_eq!(scalar(&evaluation, "bw", "fast").unwrap(), 1000.0 / 12.0);
    assert_eq!(evaluation.counts.get("op"), 2);
    assert_eq!(evaluation.counts.get("ac"), 2);
    assert_eq!(evaluation.context.counts().total(), 4);
    assert_eq!(amp.runs().len(), 4);
    assert_eq!(amp.cleanups(), 1);
}

#[test]
fn failed_jobs_only_affect_their_own_measures() {
    let amp = Amplifier::new().failing("slow_op");
    let evaluation = evaluate(&amplifier_problem(), &amp, &["gain", "bw"], 8.0);

    assert_eq!(evaluation.results["gain"]["slow"], None);
    assert_eq!(scalar(&evaluation, "gain", "fast"), Some(12.0));
    assert!(scalar(&evaluation, "bw", "slow").is_some());
    assert_eq!(evaluation.counts.get("op"), 1);
    assert_eq!(evaluation.counts.get("ac"), 2);
}

#[test]
fn unreadable_results_are_not_counted() {
    let amp = Amplifier::new().unreadable("fast_ac");
    let evaluation = evaluate(&amplifier_problem(), &amp, &["gain", "bw"], 8.0);

    assert!(amp.runs().iter().any(|job| job == "fast_ac"));
    assert_eq!(evaluation.results["bw"]["fast"], None);
    assert!(scalar(&evaluation, "bw", "slow").is_some());
    assert_eq!(evaluation.counts.get("ac"), 1);
}

#[test]
fn a_failing_job_fails_its_whole_group() {
    let amp = Amplifier::new()
        .grouping(Grouping::PerBatch)
        .failing("slow_ac");
    let evaluation = evaluate(&amplifier_problem(), &amp, &["gain", "bw"], 8.0);

    for measure in ["gain", "bw"] {
        for corner in ["fast", "slow"] {
            assert_eq!(evaluation.results[measure][corner], None);
        }
    }
    assert_eq!(evaluation.counts.total(), 0);
}

#[test]
fn panicking_groups_are_contained() {
    let amp = Amplifier::new().panicking("fast_op");
    let evaluation = evaluate(&amplifier_problem(), &amp, &["gain"], 8.0);

    assert_eq!(evaluation.results["gain"]["fast"], None);
    assert_eq!(scalar(&evaluation, "gain", "slow"), Some(8.0));
    assert_eq!(evaluation.counts.get("op"), 1);
}

#[test]
fn invalid_groupings_are_rejected() {
    let amp = Amplifier::new().grouping(Grouping::Duplicated);
    let problem = amplifier_problem();
    let (dispatcher, ctx) =
        dispatcher(&problem, &simulators(&amp), &["gain"], Arc::new(Sequential)).unwrap();

    match dispatcher.evaluate(&params([("x", 8.0)]), &ctx) {
        Err(Error::InvalidGrouping { simulator, .. }) => assert_eq!(simulator, "amp"),
        other => panic!("expected an invalid grouping error, got {other:?}"),
    }
    assert!(amp.runs().is_empty());
}

#[test]
fn groupings_are_checked_before_any_job_runs() {
    let mut problem = amplifier_problem();
    problem
        .heads
        .insert(arcstr::literal!("xyce"), Head::new("amp2").param("k", 1.0));
    problem
        .analyses
        .insert(arcstr::literal!("tran"), Analysis::new("xyce").command("tran"));
    problem
        .measures
        .insert(arcstr::literal!("out"), Measure::new("tran", "gain"));
    let good = Amplifier::new();
    let bad = Amplifier::new().grouping(Grouping::Duplicated);
    let sims = simulators(&good).with("amp2", bad.clone());
    let (dispatcher, ctx) =
        dispatcher(&problem, &sims, &["gain", "out"], Arc::new(Sequential)).unwrap();

    match dispatcher.evaluate(&params([("x", 8.0)]), &ctx) {
        Err(Error::InvalidGrouping { simulator, .. }) => assert_eq!(simulator, "amp2"),
        other => panic!("expected an invalid grouping error, got {other:?}"),
    }
    assert!(good.runs().is_empty());
    assert!(bad.runs().is_empty());
    assert_eq!(good.cleanups(), 0);
}

#[test]
fn unknown_simulators_are_rejected() {
    let problem = amplifier_problem();
    let err = dispatcher(&problem, &Simulators::new(), &["gain"], Arc::new(Sequential)).unwrap_err();

    let issues = match err {
        Error::Compile(issues) => issues,
        other => panic!("expected a compilation error, got {other}"),
    };
    assert!(issues.iter().any(|issue| matches!(
        issue.cause(),
        Cause::UnknownSimulator { head, simulator } if head == "spice" && simulator == "amp"
    )));
}

#[test]
fn design_params_cannot_shadow_fixed_params() {
    let mut problem = amplifier_problem();
    problem.fixed_params.insert(arcstr::literal!("x"), 3.0);
    let amp = Amplifier::new();
    let (dispatcher, ctx) =
        dispatcher(&problem, &simulators(&amp), &["gain"], Arc::new(Sequential)).unwrap();

    assert!(matches!(
        dispatcher.evaluate(&params([("x", 8.0)]), &ctx),
        Err(Error::ParamCollision { name }) if name == "x"
    ));
}

#[test]
fn fixed_params_reach_the_simulator() {
    let mut problem = amplifier_problem();
    problem.params.clear();
    problem.fixed_params.insert(arcstr::literal!("x"), 4.0);
    let amp = Amplifier::new();
    let (dispatcher, ctx) =
        dispatcher(&problem, &simulators(&amp), &["gain"], Arc::new(Sequential)).unwrap();
    let evaluation = dispatcher.evaluate(&Default::default(), &ctx).unwrap();

    assert_eq!(scalar(&evaluation, "gain", "fast"), Some(6.0));
}

#[test]
fn measure_values_are_postprocessed() {
    let mut problem = amplifier_problem();
    problem.measures.extend([
        (arcstr::literal!("peak"), Measure::new("op", "max(wave)")),
        (
            arcstr::literal!("wave"),
            Measure::new("op", "wave")
                .vector()
                .components(r#"["first", "second", "third"]"#),
        ),
        (arcstr::literal!("flat"), Measure::new("op", "wave")),
        (arcstr::literal!("label"), Measure::new("op", "'out'")),
        (arcstr::literal!("out"), Measure::new("op", "vout(0.5)")),
        (arcstr::literal!("broken"), Measure::new("op", "vout()")),
    ]);
    let amp = Amplifier::new();
    let (dispatcher, ctx) = dispatcher(
        &problem,
        &simulators(&amp),
        &["peak", "wave", "flat", "label", "out", "broken"],
        Arc::new(Sequential),
    )
    .unwrap();
    let evaluation = dispatcher.evaluate(&params([("x", 2.0)]), &ctx).unwrap();

    assert_eq!(
        dispatcher.components("wave").unwrap(),
        ["first", "second", "third"]
    );
    assert_eq!(scalar(&evaluation, "peak", "slow"), Some(6.0));
    assert_eq!(
        evaluation.results["wave"]["fast"],
        Some(MeasureValue::Vector(vec![3.0, 6.0, 9.0]))
    );
    assert_eq!(evaluation.results["flat"]["fast"], None);
    assert_eq!(evaluation.results["label"]["fast"], None);
    assert_eq!(scalar(&evaluation, "out", "fast"), Some(1.5));
    assert_eq!(evaluation.results["broken"]["fast"], None);
    // One invocation per job, however many measures it feeds.
    assert_eq!(evaluation.counts.get("op"), 2);
}

#[test]
fn dependent_measures_see_results_and_corner() {
    let mut problem = amplifier_problem();
    problem.measures.extend([
        (
            arcstr::literal!("gbw"),
            Measure::dependent(r#"result["gain"][corner] * result["bw"][corner]"#)
                .depends(["gain", "bw"]),
        ),
        (
            arcstr::literal!("double"),
            Measure::dependent(r#"2 * result["gbw"][corner]"#).depends(["gbw"]),
        ),
    ]);
    let amp = Amplifier::new().failing("slow_op");
    let evaluation = evaluate(&problem, &amp, &["double"], 8.0);

    assert_relative_eq!(scalar(&evaluation, "gbw", "fast").unwrap(), 1000.0);
    assert_relative_eq!(scalar(&evaluation, "double", "fast").unwrap(), 2000.0);
    // Failures propagate through dependents.
    assert_eq!(evaluation.results["gbw"]["slow"], None);
    assert_eq!(evaluation.results["double"]["slow"], None);
}

#[test]
fn variables_are_visible_to_measures() {
    let mut problem = amplifier_problem();
    problem
        .variables
        .insert(arcstr::literal!("target"), Variable::Real(10.0));
    problem.measures.insert(
        arcstr::literal!("margin"),
        Measure::new("op", "gain - target").corners(["fast"]),
    );
    let evaluation = evaluate(&problem, &Amplifier::new(), &["margin"], 8.0);

    assert_eq!(scalar(&evaluation, "margin", "fast"), Some(2.0));
    assert!(!evaluation.results["margin"].contains_key("slow"));
    assert_eq!(evaluation.counts.get("op"), 1);
}

#[test]
fn invalid_expressions_are_rejected_up_front() {
    let mut problem = amplifier_problem();
    problem
        .measures
        .insert(arcstr::literal!("bad"), Measure::new("op", "gain +"));
    let err = dispatcher(
        &problem,
        &simulators(&Amplifier::new()),
        &["bad"],
        Arc::new(Sequential),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Expression { measure, .. } if measure == "bad"));
}

#[test]
fn thread_pool_matches_sequential_dispatch() {
    let problem = amplifier_problem();
    let sequential = evaluate(&problem, &Amplifier::new(), &["gain", "bw"], 5.0);

    let amp = Amplifier::new().grouping(Grouping::PerJob);
    let (dispatcher, ctx) = dispatcher(
        &problem,
        &simulators(&amp),
        &["gain", "bw"],
        Arc::new(ThreadPool::new(3)),
    )
    .unwrap();
    let pooled = dispatcher.evaluate(&params([("x", 5.0)]), &ctx).unwrap();

    assert_eq!(pooled.results, sequential.results);
    assert_eq!(pooled.counts, sequential.counts);
    assert_eq!(amp.runs().len(), 4);
}
