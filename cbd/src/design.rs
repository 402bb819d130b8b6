//! The multi-pass design loop.
//!
//! Every pass evaluates the design in every corner, adds the worst corner of
//! each requirement to its measure's active corner set, and re-optimizes with
//! only the active corners. Measures with an explicit corner list are only
//! scored in the corners they list. The loop ends once a full evaluation adds no new
//! corner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, info_span};

use crate::aggregate::{Aggregate, Aggregator};
use crate::compile::{CompileOptions, Definitions, JobGraph};
use crate::context::{AnalysisCount, RunContext};
use crate::dispatch::{Dispatcher, MeasureResults};
use crate::error::{Error, Result};
use crate::evaluator::{ExprEvaluator, MeasureEvaluator};
use crate::execute::{Executor, Sequential, ThreadPool};
use crate::optimizer::{
    Annotation, AnnotationCollector, Evaluated, HookeJeevesFactory, IterationReporter,
    OptimizerFactory, OptimizerSettings, Plugin, StopWhenFulfilled,
};
use crate::problem::{Defaults, Measure, Method, ParamMap, Problem};
use crate::report::{format_aggregate, format_results};
use crate::simulator::Simulators;
use crate::sink::{ConclusionRecord, PassRecord, Record, RecordId, ResultsSink};

/// The states of the design loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Evaluating the design in every corner.
    Evaluating,
    /// Adding worst corners to the active corner sets.
    GrowingCorners,
    /// Optimizing over the active corners.
    Optimizing,
    /// Finished.
    Done,
}

/// The state carried from one pass to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct PassState {
    /// The pass number, starting at 1.
    pub pass: usize,
    /// The current design parameters.
    pub params: ParamMap,
    /// The measures, with their active corner sets.
    pub measures: IndexMap<ArcStr, Measure>,
    /// Corners added during this pass, as (measure, corner) pairs.
    pub added: Vec<(ArcStr, ArcStr)>,
}

/// The result of a design run.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The final design parameters.
    pub params: ParamMap,
    /// The number of passes.
    pub passes: usize,
    /// The final full evaluation.
    pub results: MeasureResults,
    /// The aggregate of the final full evaluation.
    pub aggregate: Aggregate,
    /// The corners each measure was optimized in.
    pub corners: IndexMap<ArcStr, Vec<ArcStr>>,
    /// Simulator invocations over the whole run.
    pub counts: AnalysisCount,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// Runs the design loop for a [`Problem`].
pub struct DesignLoop {
    problem: Problem,
    simulators: Simulators,
    executor: Arc<dyn Executor>,
    evaluator: Arc<dyn MeasureEvaluator>,
    optimizer: Arc<dyn OptimizerFactory>,
    sink: Option<Arc<dyn ResultsSink>>,
    defaults: Defaults,
}

impl DesignLoop {
    /// Creates a design loop that runs jobs sequentially and optimizes with
    /// pattern search.
    pub fn new(problem: Problem, simulators: Simulators) -> Self {
        Self {
            problem,
            simulators,
            executor: Arc::new(Sequential),
            evaluator: Arc::new(ExprEvaluator),
            optimizer: Arc::new(HookeJeevesFactory),
            sink: None,
            defaults: Defaults::default(),
        }
    }

    /// Sets the executor jobs run on.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the measure evaluator.
    pub fn evaluator(mut self, evaluator: Arc<dyn MeasureEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Sets the optimizer.
    pub fn optimizer(mut self, optimizer: Arc<dyn OptimizerFactory>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Records passes, iterations and the conclusion in `sink`.
    pub fn sink(mut self, sink: Arc<dyn ResultsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the fallbacks for options the problem leaves unset.
    pub fn defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Applies user settings: design defaults and a worker pool.
    pub fn config(self, config: &config::Config) -> Self {
        let defaults = Defaults::from(&config.design);
        self.defaults(defaults)
            .executor(Arc::new(ThreadPool::new(config.executor.workers)))
    }

    /// Runs the loop to completion.
    ///
    /// Fails if the problem is inconsistent. Simulator and measure failures
    /// never fail the run.
    pub fn run(&self) -> Result<Outcome> {
        let start = Instant::now();
        let problem = &self.problem;
        let options = &problem.options;

        let names: Vec<ArcStr> = problem.params.keys().cloned().collect();
        if let Some(name) = names.iter().find(|n| problem.fixed_params.contains_key(*n)) {
            return Err(Error::ParamCollision { name: name.clone() });
        }

        let run = Run::new(self);
        run.settings.validate()?;
        let mut ctx = RunContext::from_problem(problem);
        let full = Dispatcher::new(
            JobGraph::compile(
                &run.defs,
                &problem.measures,
                &run.active,
                &CompileOptions::full().with_corner_order(options.corner_order.clone()),
            )?,
            &problem.measures,
            &problem.heads,
            &self.simulators,
            self.evaluator.as_ref(),
            self.executor.clone(),
            &ctx,
        )?;
        let admissible = full.graph().admissible.clone();

        let mut measures = problem.measures.clone();
        if options.incremental_corners {
            for measure in measures.values_mut() {
                measure.corners = Some(Vec::new());
            }
        }
        let mut pass = PassState {
            pass: 0,
            params: problem.initial_params(),
            measures,
            added: Vec::new(),
        };

        let mut state = State::Evaluating;
        let mut last = (MeasureResults::new(), Aggregate::default());
        let mut pass_id = None;
        loop {
            if state == State::Evaluating {
                pass.pass += 1;
                pass.added.clear();
            }
            let span = info_span!("pass", n = pass.pass);
            let _guard = span.enter();
            state = match state {
                State::Evaluating => {
                    let evaluation = full.evaluate(&pass.params, &ctx)?;
                    ctx = evaluation.context;
                    let aggregate = run
                        .aggregator
                        .aggregate(&restrict(&evaluation.results, &run.allowed));
                    info!(
                        cost = aggregate.cost,
                        fulfilled = aggregate.all_fulfilled(),
                        "evaluated design in every corner"
                    );
                    debug!("measures:\n{}", format_results(&evaluation.results));
                    debug!("aggregate:\n{}", format_aggregate(&aggregate));

                    pass_id = self.sink.as_ref().map(|sink| {
                        sink.commit(
                            None,
                            Record::Pass(PassRecord {
                                pass: pass.pass,
                                params: pass.params.clone(),
                                cost: aggregate.cost,
                                corners: active_corners(&pass.measures, &admissible),
                            }),
                        )
                    });
                    last = (evaluation.results, aggregate);

                    if options.method == Method::None {
                        State::Done
                    } else if options.incremental_corners {
                        State::GrowingCorners
                    } else if pass.pass > 1 {
                        State::Done
                    } else {
                        State::Optimizing
                    }
                }
                State::GrowingCorners => {
                    pass.added = grow(
                        &mut pass.measures,
                        &last.1,
                        run.aggregator.has_tradeoffs(),
                        &run.allowed,
                    );
                    if pass.added.is_empty() {
                        info!("no corners added");
                        State::Done
                    } else {
                        for (measure, corner) in &pass.added {
                            info!(%measure, %corner, "added corner");
                        }
                        State::Optimizing
                    }
                }
                State::Optimizing => {
                    let (params, counts) = run.optimize(&pass, pass_id, &ctx)?;
                    pass.params = params;
                    ctx = ctx.with_counts(&counts);
                    State::Evaluating
                }
                State::Done => break,
            };
        }

        let (results, aggregate) = last;
        let elapsed = start.elapsed();
        info!(
            passes = pass.pass,
            cost = aggregate.cost,
            invocations = ctx.counts().total(),
            "design finished in {:?}",
            elapsed
        );
        if let Some(sink) = &self.sink {
            sink.commit(
                None,
                Record::Conclusion(ConclusionRecord {
                    passes: pass.pass,
                    params: pass.params.clone(),
                    cost: aggregate.cost,
                    counts: ctx.counts().clone(),
                    elapsed,
                }),
            );
        }
        Ok(Outcome {
            corners: active_corners(&pass.measures, &admissible),
            params: pass.params,
            passes: pass.pass,
            results,
            aggregate,
            counts: ctx.counts().clone(),
            elapsed,
        })
    }
}

/// Everything fixed for the duration of one [`DesignLoop::run`].
struct Run<'a> {
    design: &'a DesignLoop,
    defs: Definitions,
    active: Vec<ArcStr>,
    aggregator: Aggregator,
    settings: OptimizerSettings,
    stop_when_satisfied: bool,
    /// Corners each measure may grow into; [`None`] means every admissible corner.
    allowed: IndexMap<ArcStr, Option<IndexSet<ArcStr>>>,
    names: Vec<ArcStr>,
    lo: Vec<f64>,
    hi: Vec<f64>,
    x0: Vec<f64>,
}

impl<'a> Run<'a> {
    fn new(design: &'a DesignLoop) -> Self {
        let problem = &design.problem;
        let options = &problem.options;
        let aggregator = Aggregator::from_requirements(
            &problem.requirements,
            options
                .failure_penalty
                .unwrap_or(design.defaults.failure_penalty),
        );
        let stop_when_satisfied = options
            .stop_when_all_satisfied
            .unwrap_or_else(|| !aggregator.has_tradeoffs());
        Self {
            design,
            defs: Definitions::from_problem(problem),
            active: problem.active_measures(),
            settings: OptimizerSettings {
                max_iter: options.max_iter.unwrap_or(design.defaults.max_iter),
                step_tol: options.step_tol.unwrap_or(design.defaults.step_tol),
            },
            aggregator,
            stop_when_satisfied,
            allowed: problem
                .measures
                .iter()
                .map(|(name, m)| {
                    let allowed = m.corners.as_ref().map(|c| c.iter().cloned().collect());
                    (name.clone(), allowed)
                })
                .collect(),
            names: problem.params.keys().cloned().collect(),
            lo: problem.params.values().map(|p| p.lo).collect(),
            hi: problem.params.values().map(|p| p.hi).collect(),
            x0: problem.params.values().map(|p| p.init).collect(),
        }
    }

    fn to_params(&self, x: &[f64]) -> ParamMap {
        self.names.iter().cloned().zip(x.iter().copied()).collect()
    }

    /// Optimizes over each measure's active corners.
    ///
    /// Returns the new parameters and the invocations made while optimizing.
    fn optimize(
        &self,
        pass: &PassState,
        pass_id: Option<RecordId>,
        ctx: &RunContext,
    ) -> Result<(ParamMap, AnalysisCount)> {
        let design = self.design;
        let problem = &design.problem;
        let graph = JobGraph::compile(
            &self.defs,
            &pass.measures,
            &self.active,
            &CompileOptions::default().with_corner_order(problem.options.corner_order.clone()),
        )?;
        debug!(jobs = graph.num_jobs(), "optimizing over active corners");
        let dispatcher = Dispatcher::new(
            graph,
            &pass.measures,
            &problem.heads,
            &design.simulators,
            design.evaluator.as_ref(),
            design.executor.clone(),
            ctx,
        )?;

        let mut optimizer = design.optimizer.build(&self.lo, &self.hi, &self.settings);
        let start: Vec<f64> = if problem.options.forward_solution {
            self.names
                .iter()
                .zip(&self.x0)
                .map(|(name, &x0)| pass.params.get(name).copied().unwrap_or(x0))
                .collect()
        } else {
            self.x0.clone()
        };
        optimizer.reset(&start);

        let mut cost = |x: &[f64]| -> Result<Evaluated> {
            let evaluation = dispatcher.evaluate(&self.to_params(x), ctx)?;
            let aggregate = self.aggregator.aggregate(&evaluation.results);
            Ok(Evaluated {
                cost: aggregate.cost,
                annotation: Annotation {
                    counts: evaluation.counts,
                    aggregate,
                    results: evaluation.results,
                },
            })
        };
        let mut collector = AnnotationCollector::default();
        let mut reporter = IterationReporter::new(
            self.names.clone(),
            design.sink.clone().zip(pass_id),
        );
        let mut stop = StopWhenFulfilled::default();
        {
            let mut plugins: Vec<&mut dyn Plugin> = vec![&mut collector, &mut reporter];
            if self.stop_when_satisfied {
                plugins.push(&mut stop);
            }
            optimizer.run(&mut cost, &mut plugins)?;
        }
        info!(
            niter = optimizer.niter(),
            cost = optimizer.f(),
            "optimization finished"
        );
        Ok((self.to_params(optimizer.x()), collector.counts))
    }
}

/// Adds the worst corner of every entry to its measure's corner set.
///
/// Each addition propagates to the measure's dependencies. Returns the
/// (measure, corner) pairs that were added.
fn grow(
    measures: &mut IndexMap<ArcStr, Measure>,
    aggregate: &Aggregate,
    has_tradeoffs: bool,
    allowed: &IndexMap<ArcStr, Option<IndexSet<ArcStr>>>,
) -> Vec<(ArcStr, ArcStr)> {
    let mut added = Vec::new();
    for entry in &aggregate.entries {
        if entry.excluded {
            continue;
        }
        let Some(corner) = &entry.worst_corner else {
            continue;
        };
        let Some(measure) = measures.get(&entry.measure) else {
            continue;
        };
        let current = measure.corners.as_deref().unwrap_or_default();
        if current.contains(corner) || (!has_tradeoffs && entry.fulfilled && !current.is_empty()) {
            continue;
        }

        let mut stack = vec![entry.measure.clone()];
        let mut visited = IndexSet::new();
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(Some(allowed)) = allowed.get(&name) {
                if !allowed.contains(corner) {
                    continue;
                }
            }
            let Some(measure) = measures.get_mut(&name) else {
                continue;
            };
            let corners = measure.corners.get_or_insert_with(Vec::new);
            if !corners.contains(corner) {
                corners.push(corner.clone());
                added.push((name.clone(), corner.clone()));
            }
            stack.extend(measure.depends.iter().cloned());
        }
    }
    added
}

/// Drops the values of corners a measure's explicit corner list leaves out.
fn restrict(
    results: &MeasureResults,
    allowed: &IndexMap<ArcStr, Option<IndexSet<ArcStr>>>,
) -> MeasureResults {
    results
        .iter()
        .map(|(name, values)| {
            let values = match allowed.get(name) {
                Some(Some(allowed)) => values
                    .iter()
                    .filter(|(corner, _)| allowed.contains(*corner))
                    .map(|(corner, value)| (corner.clone(), value.clone()))
                    .collect(),
                _ => values.clone(),
            };
            (name.clone(), values)
        })
        .collect()
}

/// The corners each measure is evaluated in when optimizing.
fn active_corners(
    measures: &IndexMap<ArcStr, Measure>,
    admissible: &IndexMap<ArcStr, IndexSet<ArcStr>>,
) -> IndexMap<ArcStr, Vec<ArcStr>> {
    measures
        .iter()
        .map(|(name, measure)| {
            let corners = match &measure.corners {
                Some(corners) => corners.clone(),
                None => admissible
                    .get(name)
                    .map(|c| c.iter().cloned().collect())
                    .unwrap_or_default(),
            };
            (name.clone(), corners)
        })
        .collect()
}
