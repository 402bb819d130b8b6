//! Job dispatch and measure evaluation.
//!
//! A [`Dispatcher`] runs the jobs of a compiled [`JobGraph`] on the
//! registered simulator backends and evaluates every measure mapped to each
//! job. Job and evaluation failures are local: the affected measures are
//! recorded as [`None`] at the affected corner and nothing else changes.

use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, warn};

use crate::compile::JobGraph;
use crate::context::{AnalysisCount, RunContext};
use crate::error::{Error, Result};
use crate::evaluator::{component_names, CompiledMeasure, MeasureEvaluator};
use crate::execute::{submit, Executor, Task};
use crate::merge::merge_layers;
use crate::problem::{Head, Measure, ParamMap};
use crate::simulator::{check_partition, JobBatch, SimResult, Simulator, Simulators};
use crate::validation::{Cause, Issues};

/// A post-processed measure value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureValue {
    /// A scalar.
    Scalar(f64),
    /// A vector with at least two elements.
    Vector(Vec<f64>),
}

impl MeasureValue {
    /// The elements of the value.
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Self::Scalar(x) => std::slice::from_ref(x),
            Self::Vector(v) => v,
        }
    }

    /// The value if it is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(x) => Some(*x),
            Self::Vector(_) => None,
        }
    }
}

impl From<&MeasureValue> for mexpr::Value {
    fn from(value: &MeasureValue) -> Self {
        match value {
            MeasureValue::Scalar(x) => mexpr::Value::Real(*x),
            MeasureValue::Vector(v) => mexpr::Value::Array(v.clone()),
        }
    }
}

/// Measure values by measure, then by corner. Failed values are [`None`].
pub type MeasureResults = IndexMap<ArcStr, IndexMap<ArcStr, Option<MeasureValue>>>;

/// Coerces a raw measure value into a [`MeasureValue`].
///
/// Complex, string and record values are rejected, as are empty arrays,
/// non-finite elements and arrays with more than one element unless `vector`
/// is set.
pub fn postprocess(value: mexpr::Value, vector: bool) -> Option<MeasureValue> {
    let array = match value {
        mexpr::Value::Real(x) if x.is_finite() => return Some(MeasureValue::Scalar(x)),
        mexpr::Value::Real(_) => return None,
        mexpr::Value::Array(v) => v,
        mexpr::Value::List(items) => items
            .iter()
            .map(mexpr::Value::as_real)
            .collect::<Option<Vec<_>>>()?,
        mexpr::Value::Complex(_) | mexpr::Value::Str(_) | mexpr::Value::Record(_) => return None,
    };
    if !array.iter().all(|x| x.is_finite()) {
        return None;
    }
    match array.len() {
        0 => None,
        1 => Some(MeasureValue::Scalar(array[0])),
        _ if vector => Some(MeasureValue::Vector(array)),
        _ => None,
    }
}

/// The output of [`Dispatcher::evaluate`].
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Measure values, including failures.
    pub results: MeasureResults,
    /// Successful simulator invocations during this evaluation.
    pub counts: AnalysisCount,
    /// The input context with `counts` accumulated.
    pub context: RunContext,
}

type JobResults = Vec<(usize, Option<Arc<dyn SimResult>>)>;

/// The backend running one head's jobs.
struct Backend {
    id: ArcStr,
    sim: Arc<dyn Simulator>,
}

/// Runs compiled jobs and evaluates measures.
pub struct Dispatcher {
    graph: Arc<JobGraph>,
    measures: IndexMap<ArcStr, Measure>,
    compiled: IndexMap<ArcStr, Arc<dyn CompiledMeasure>>,
    components: IndexMap<ArcStr, Vec<ArcStr>>,
    backends: IndexMap<ArcStr, Backend>,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.graph.num_jobs())
            .field("measures", &self.compiled.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Prepares `graph` for dispatch.
    ///
    /// Compiles the expressions of every required measure and evaluates the
    /// component names of vector measures against the variables in `ctx`.
    /// Fails if a head that has jobs runs on an unregistered simulator.
    pub fn new(
        graph: JobGraph,
        measures: &IndexMap<ArcStr, Measure>,
        heads: &IndexMap<ArcStr, Head>,
        simulators: &Simulators,
        evaluator: &dyn MeasureEvaluator,
        executor: Arc<dyn Executor>,
        ctx: &RunContext,
    ) -> Result<Self> {
        let mut issues = Issues::new();
        let mut backends = IndexMap::new();
        for head_name in graph.jobs.keys() {
            let Some(head) = heads.get(head_name) else {
                continue;
            };
            match simulators.get(&head.simulator) {
                Some(sim) => {
                    backends.insert(
                        head_name.clone(),
                        Backend {
                            id: head.simulator.clone(),
                            sim: sim.clone(),
                        },
                    );
                }
                None => issues.error(Cause::UnknownSimulator {
                    head: head_name.clone(),
                    simulator: head.simulator.clone(),
                }),
            }
        }
        if issues.has_error() {
            return Err(Error::Compile(issues));
        }

        let mut compiled = IndexMap::new();
        let mut components = IndexMap::new();
        let env = ctx.environment();
        for name in &graph.required {
            let measure = &measures[name];
            let program = evaluator
                .compile(&measure.expression)
                .map_err(|message| Error::Expression {
                    measure: name.clone(),
                    message,
                })?;
            compiled.insert(name.clone(), program);

            if let Some(source) = measure.components.as_ref().filter(|_| measure.vector) {
                let names = evaluator
                    .compile(source)
                    .and_then(|program| program.evaluate(&env).map_err(|e| e.to_string()))
                    .and_then(component_names)
                    .map_err(|message| Error::Expression {
                        measure: name.clone(),
                        message: format!("invalid components: {message}"),
                    })?;
                components.insert(name.clone(), names);
            }
        }

        Ok(Self {
            measures: graph
                .required
                .iter()
                .map(|name| (name.clone(), measures[name].clone()))
                .collect(),
            graph: Arc::new(graph),
            compiled,
            components,
            backends,
            executor,
        })
    }

    /// The compiled job graph.
    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    /// The component names of a vector measure, if it declares any.
    pub fn components(&self, measure: &str) -> Option<&[ArcStr]> {
        self.components.get(measure).map(Vec::as_slice)
    }

    /// Runs every job at the design parameters `params` and evaluates every
    /// required measure.
    pub fn evaluate(&self, params: &ParamMap, ctx: &RunContext) -> Result<Evaluation> {
        let span = debug_span!("dispatch");
        let _guard = span.enter();

        if let Some(name) = params.keys().find(|k| ctx.fixed_params().contains_key(*k)) {
            return Err(Error::ParamCollision { name: name.clone() });
        }
        let input = merge_layers([ctx.fixed_params(), params]);

        let mut results: MeasureResults = self
            .graph
            .measure_corners
            .iter()
            .map(|(name, corners)| (name.clone(), corners.iter().map(|c| (c.clone(), None)).collect()))
            .collect();

        // Check every grouping before submitting anything.
        let mut grouped = Vec::new();
        for (head, jobs) in &self.graph.jobs {
            let Some(Backend { id, sim }) = self.backends.get(head) else {
                continue;
            };
            let batch = Arc::new(JobBatch {
                jobs: jobs.clone(),
                params: input.clone(),
            });
            let groups = sim.group_jobs(&batch);
            check_partition(&groups, batch.jobs.len()).map_err(|message| {
                Error::InvalidGrouping {
                    simulator: id.clone(),
                    message,
                }
            })?;
            grouped.push((head, sim, batch, groups));
        }

        // Submit every group of every head before waiting on any of them.
        let mut batches = Vec::new();
        for (head, sim, batch, groups) in grouped {
            let tasks = groups
                .into_iter()
                .enumerate()
                .map(|(i, group)| {
                    let sim = sim.clone();
                    let batch = batch.clone();
                    Task::new(arcstr::format!("{head}/{i}"), move || {
                        run_group(sim.as_ref(), &batch, &group)
                    })
                })
                .collect();
            let handles = submit(self.executor.as_ref(), tasks);
            batches.push((sim, batch, handles));
        }

        let mut counts = AnalysisCount::new();
        for (sim, batch, handles) in &batches {
            for handle in handles {
                let outputs = match handle.wait() {
                    Ok(Ok(outputs)) => outputs,
                    Ok(Err(e)) => {
                        warn!(group = %handle.key(), error = %e, "job group failed");
                        continue;
                    }
                    Err(_) => {
                        error!(group = %handle.key(), "job group panicked");
                        continue;
                    }
                };
                for (i, result) in outputs {
                    let job = &batch.jobs[*i];
                    let Some(result) = result else {
                        warn!(job = %job.name, "job produced no result");
                        continue;
                    };
                    if let Some(analysis) = &job.key.analysis {
                        counts.add(analysis, 1);
                    }
                    let mut env = ctx.environment();
                    env.extend(result.environment());
                    for measure in self.graph.measures_at(&job.key) {
                        let value = self.evaluate_measure(measure, &job.key.corner, &env);
                        set_result(&mut results, measure, &job.key.corner, value);
                    }
                }
            }
            sim.cleanup(batch);
        }

        for name in &self.graph.dependent_order {
            let mut env = ctx.environment();
            env.set_var("result", result_record(&results));
            let corners = self.graph.measure_corners.get(name).cloned().unwrap_or_default();
            for corner in &corners {
                env.set_var("corner", corner.clone());
                let value = self.evaluate_measure(name, corner, &env);
                set_result(&mut results, name, corner, value);
            }
        }

        debug!(
            jobs = self.graph.num_jobs(),
            invocations = counts.total(),
            "dispatch complete"
        );
        let context = ctx.with_counts(&counts);
        Ok(Evaluation {
            results,
            counts,
            context,
        })
    }

    fn evaluate_measure(
        &self,
        measure: &ArcStr,
        corner: &ArcStr,
        env: &mexpr::Environment,
    ) -> Option<MeasureValue> {
        let program = self.compiled.get(measure)?;
        let vector = self.measures.get(measure).is_some_and(|m| m.vector);
        match program.evaluate(env) {
            Ok(value) => {
                let kind = value.type_name();
                let value = postprocess(value, vector);
                if value.is_none() {
                    warn!(%measure, %corner, kind, "measure value rejected");
                }
                value
            }
            Err(e) => {
                warn!(
                    %measure,
                    %corner,
                    source = program.source(),
                    error = %e,
                    "measure evaluation failed"
                );
                None
            }
        }
    }
}

fn run_group(sim: &dyn Simulator, batch: &JobBatch, group: &[usize]) -> anyhow::Result<JobResults> {
    let status = sim.run_group(batch, group)?;
    Ok(group
        .iter()
        .map(|&i| {
            let result = if status.jobs.contains(&i) {
                sim.read_result(batch, i, &status)
            } else {
                None
            };
            (i, result)
        })
        .collect())
}

fn set_result(results: &mut MeasureResults, measure: &ArcStr, corner: &ArcStr, value: Option<MeasureValue>) {
    results
        .entry(measure.clone())
        .or_default()
        .insert(corner.clone(), value);
}

/// Builds the `result` record seen by dependent measures.
fn result_record(results: &MeasureResults) -> mexpr::Value {
    mexpr::Value::Record(
        results
            .iter()
            .map(|(measure, corners)| {
                let corners: IndexMap<ArcStr, mexpr::Value> = corners
                    .iter()
                    .filter_map(|(corner, value)| Some((corner.clone(), value.as_ref()?.into())))
                    .collect();
                (measure.clone(), mexpr::Value::Record(corners))
            })
            .collect(),
    )
}
