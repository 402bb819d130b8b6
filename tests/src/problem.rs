use approx::assert_relative_eq;
use test_log::test;

use cbd::problem::{Corners, Method, Problem};
use cbd::report::{format_aggregate, format_results};
use cbd::{DesignLoop, Error};

use crate::paths::get_path;
use crate::shared::amplifier::Amplifier;
use crate::shared::simulators;

#[test]
fn problems_load_from_toml() {
    let problem = Problem::from_file(get_path("problems", "amplifier.toml")).unwrap();

    assert_eq!(problem.heads["spice"].simulator, "amp");
    assert_eq!(problem.fixed_params["vdd"], 1.8);
    assert!(problem.measures["gbw"].is_dependent());
    assert!(matches!(&problem.corners, Corners::Explicit(corners) if corners.len() == 2));
    assert_eq!(problem.corner_map()["fast"].params["k"], 1.5);
    assert!(problem.requirements["gbw"].exclude);
    assert_eq!(problem.active_measures(), ["gain", "gbw"]);
    assert_eq!(problem.options.method, Method::Local);
    assert!(problem.options.incremental_corners);
}

#[test]
fn toml_problems_run_end_to_end() {
    let problem = Problem::from_file(get_path("problems", "amplifier.toml")).unwrap();
    let outcome = DesignLoop::new(problem, simulators(&Amplifier::new()))
        .run()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_relative_eq!(outcome.params["x"], 12.75, epsilon = 1e-9);
    assert_eq!(outcome.corners["gain"], ["slow"]);
    // Excluded requirements never add corners.
    assert!(outcome.corners["gbw"].is_empty());
    assert!(outcome.aggregate.all_fulfilled());

    let table = format_results(&outcome.results);
    assert!(table.lines().next().unwrap().starts_with("measure"));
    assert!(table.contains("gbw"));
    let summary = format_aggregate(&outcome.aggregate);
    assert!(summary.contains("gain >= 10: worst 1.275000e1 at slow [ok]"));
    assert!(summary.contains("[excluded]"));
}

#[test]
fn malformed_problems_are_rejected() {
    assert!(matches!(
        Problem::from_toml_str("[params.x]\nlo = 1.0\n"),
        Err(Error::Parse(_))
    ));
    assert!(matches!(
        Problem::from_file(get_path("problems", "missing.toml")),
        Err(Error::Io(_))
    ));
}
