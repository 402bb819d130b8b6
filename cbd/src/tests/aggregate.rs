use approx::assert_relative_eq;
use arcstr::ArcStr;
use indexmap::IndexMap;
use test_log::test;

use crate::aggregate::{default_norm, Aggregator, Goal};
use crate::dispatch::{MeasureResults, MeasureValue};
use crate::problem::Requirement;

fn results<const N: usize>(measure: &str, values: [(&str, Option<MeasureValue>); N]) -> MeasureResults {
    IndexMap::from_iter([(
        ArcStr::from(measure),
        values
            .into_iter()
            .map(|(corner, v)| (ArcStr::from(corner), v))
            .collect(),
    )])
}

fn requirements<const N: usize>(reqs: [(&str, Requirement); N]) -> IndexMap<ArcStr, Requirement> {
    reqs.into_iter().map(|(m, r)| (ArcStr::from(m), r)).collect()
}

#[test]
fn worst_corner_drives_the_cost() {
    let aggregator = Aggregator::from_requirements(&requirements([("gain", Requirement::above(10.0))]), 1e4);
    let values = results(
        "gain",
        [
            ("fast", Some(MeasureValue::Scalar(12.0))),
            ("slow", Some(MeasureValue::Scalar(8.0))),
        ],
    );

    let aggregate = aggregator.aggregate(&values);

    assert_eq!(aggregate.entries.len(), 1);
    let entry = &aggregate.entries[0];
    assert_eq!(entry.goal, Goal::Above(10.0));
    assert_eq!(entry.worst_corner.as_deref(), Some("slow"));
    assert_eq!(entry.worst_value, Some(8.0));
    assert!(!entry.fulfilled);
    assert!(entry.failed_corners.is_empty());
    assert_relative_eq!(entry.contribution, 0.2);
    assert_relative_eq!(aggregate.cost, 0.2);
    assert!(!aggregate.all_fulfilled());

    // The same input aggregates identically.
    assert_eq!(aggregator.aggregate(&values), aggregate);

    // The active corner alone reproduces the worst case.
    let slow_only = results("gain", [("slow", Some(MeasureValue::Scalar(8.0)))]);
    let again = aggregator.aggregate(&slow_only);
    assert_eq!(again.entries[0].worst_corner, entry.worst_corner);
    assert_eq!(again.entries[0].fulfilled, entry.fulfilled);
    assert_relative_eq!(again.cost, aggregate.cost);
}

#[test]
fn failures_cost_the_failure_penalty() {
    let aggregator = Aggregator::from_requirements(&requirements([("gain", Requirement::above(10.0))]), 1e4);
    let aggregate = aggregator.aggregate(&results(
        "gain",
        [
            ("fast", Some(MeasureValue::Scalar(12.0))),
            ("slow", None),
            ("ss", None),
        ],
    ));

    let entry = &aggregate.entries[0];
    assert_eq!(entry.worst_corner.as_deref(), Some("slow"));
    assert_eq!(entry.worst_value, None);
    assert_eq!(entry.failed_corners, ["slow", "ss"]);
    assert!(!entry.fulfilled);
    assert_relative_eq!(aggregate.cost, 1e4);
}

#[test]
fn requirement_failure_cost_overrides_the_default() {
    let req = Requirement {
        failure: Some(50.0),
        ..Requirement::above(10.0)
    };
    let aggregator = Aggregator::from_requirements(&requirements([("gain", req)]), 1e4);
    let aggregate = aggregator.aggregate(&results("gain", [("nom", None)]));

    assert_relative_eq!(aggregate.cost, 50.0);
}

#[test]
fn vectors_are_judged_by_their_worst_element() {
    let aggregator = Aggregator::from_requirements(&requirements([("ripple", Requirement::below(1.0))]), 1e4);
    let aggregate = aggregator.aggregate(&results(
        "ripple",
        [("nom", Some(MeasureValue::Vector(vec![0.5, 1.5, 0.25])))],
    ));

    let entry = &aggregate.entries[0];
    assert_eq!(entry.worst_value, Some(1.5));
    assert_relative_eq!(entry.contribution, 0.5);
}

#[test]
fn each_bound_is_a_separate_entry() {
    let req = Requirement {
        lower: Some(1.0),
        upper: Some(2.0),
        ..Default::default()
    };
    let aggregator = Aggregator::from_requirements(&requirements([("vout", req)]), 1e4);
    let aggregate = aggregator.aggregate(&results(
        "vout",
        [
            ("lo", Some(MeasureValue::Scalar(0.5))),
            ("hi", Some(MeasureValue::Scalar(2.5))),
        ],
    ));

    assert_eq!(aggregate.entries.len(), 2);
    assert_eq!(aggregate.entries[0].goal, Goal::Above(1.0));
    assert_eq!(aggregate.entries[0].worst_corner.as_deref(), Some("lo"));
    assert_eq!(aggregate.entries[1].goal, Goal::Below(2.0));
    assert_eq!(aggregate.entries[1].worst_corner.as_deref(), Some("hi"));
    // norm = max(|1|, |2|)
    assert_relative_eq!(aggregate.cost, 0.25 + 0.25);
}

#[test]
fn ties_go_to_the_first_corner() {
    let aggregator = Aggregator::from_requirements(&requirements([("gain", Requirement::above(10.0))]), 1e4);
    let aggregate = aggregator.aggregate(&results(
        "gain",
        [
            ("a", Some(MeasureValue::Scalar(9.0))),
            ("b", Some(MeasureValue::Scalar(9.0))),
        ],
    ));

    assert_eq!(aggregate.entries[0].worst_corner.as_deref(), Some("a"));
}

#[test]
fn compliant_corners_report_the_one_closest_to_the_goal() {
    let aggregator = Aggregator::from_requirements(&requirements([("gain", Requirement::above(10.0))]), 1e4);
    let aggregate = aggregator.aggregate(&results(
        "gain",
        [
            ("fast", Some(MeasureValue::Scalar(19.0))),
            ("slow", Some(MeasureValue::Scalar(12.0))),
        ],
    ));

    let entry = &aggregate.entries[0];
    assert!(entry.fulfilled);
    assert_eq!(entry.worst_corner.as_deref(), Some("slow"));
    assert_eq!(entry.worst_value, Some(12.0));
    assert_eq!(aggregate.cost, 0.0);
}

#[test]
fn excluded_entries_are_reported_but_free() {
    let reqs = requirements([
        (
            "power",
            Requirement {
                exclude: true,
                ..Requirement::below(1e-3)
            },
        ),
        ("gain", Requirement::above(10.0)),
    ]);
    let aggregator = Aggregator::from_requirements(&reqs, 1e4);
    let mut results = results("power", [("nom", Some(MeasureValue::Scalar(2e-3)))]);
    results.insert(
        arcstr::literal!("gain"),
        IndexMap::from_iter([(arcstr::literal!("nom"), Some(MeasureValue::Scalar(20.0)))]),
    );

    let aggregate = aggregator.aggregate(&results);

    let power = &aggregate.entries[0];
    assert!(power.excluded);
    assert!(!power.fulfilled);
    assert_eq!(power.contribution, 0.0);
    assert_eq!(aggregate.cost, 0.0);
    assert!(aggregate.all_fulfilled());
}

#[test]
fn tradeoffs_reward_exceeding_the_goal() {
    let req = Requirement {
        tradeoff: 0.5,
        ..Requirement::above(10.0)
    };
    let aggregator = Aggregator::from_requirements(&requirements([("gain", req)]), 1e4);
    assert!(aggregator.has_tradeoffs());

    let aggregate = aggregator.aggregate(&results("gain", [("nom", Some(MeasureValue::Scalar(15.0)))]));

    assert!(aggregate.entries[0].fulfilled);
    assert_relative_eq!(aggregate.cost, -0.25);
}

#[test]
fn measures_without_corners_cost_nothing() {
    let aggregator = Aggregator::from_requirements(&requirements([("gain", Requirement::above(10.0))]), 1e4);
    let aggregate = aggregator.aggregate(&MeasureResults::new());

    let entry = &aggregate.entries[0];
    assert!(entry.fulfilled);
    assert_eq!(entry.worst_corner, None);
    assert_eq!(aggregate.cost, 0.0);
}

#[test]
fn default_norm_uses_largest_bound() {
    assert_eq!(default_norm(Some(-20.0), Some(5.0)), 20.0);
    assert_eq!(default_norm(Some(0.0), None), 1.0);
    assert_eq!(default_norm(None, None), 1.0);
}
