//! The optimizer contract and the built-in local optimizer.
//!
//! Optimizers minimize a [`CostFunction`] within box bounds. Every cost
//! evaluation carries an [`Annotation`] with the analysis counts and
//! diagnostics it produced; [`Plugin`]s observe each evaluation and can
//! stop a run early.

use std::sync::Arc;

use arcstr::ArcStr;
use tracing::debug;

use crate::aggregate::Aggregate;
use crate::context::AnalysisCount;
use crate::dispatch::MeasureResults;
use crate::error::{Error, Result};
use crate::problem::ParamMap;
use crate::sink::{IterationRecord, Record, RecordId, RecordKind, ResultsSink};

/// State that travels with a cost evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    /// Simulator invocations made by the evaluation.
    pub counts: AnalysisCount,
    /// The aggregate diagnostics.
    pub aggregate: Aggregate,
    /// The measure values.
    pub results: MeasureResults,
}

/// The result of one cost evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluated {
    /// The cost.
    pub cost: f64,
    /// The annotation.
    pub annotation: Annotation,
}

impl Evaluated {
    /// An evaluation without annotation.
    pub fn cost(cost: f64) -> Self {
        Self {
            cost,
            annotation: Annotation::default(),
        }
    }
}

/// A function to minimize.
pub trait CostFunction {
    /// Evaluates the cost at `x`.
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluated>;
}

impl<F> CostFunction for F
where
    F: FnMut(&[f64]) -> Result<Evaluated>,
{
    fn evaluate(&mut self, x: &[f64]) -> Result<Evaluated> {
        self(x)
    }
}

/// Observes optimizer evaluations.
pub trait Plugin {
    /// Called after every cost evaluation. `iter` starts at 1.
    fn on_evaluation(&mut self, iter: usize, x: &[f64], evaluated: &Evaluated);

    /// Returns `true` if the optimizer should stop.
    fn should_stop(&self) -> bool {
        false
    }
}

/// A bounded minimizer.
pub trait Optimizer {
    /// Sets the starting point and clears the previous run's state.
    fn reset(&mut self, x0: &[f64]);

    /// Minimizes `cost`, calling every plugin after each evaluation.
    ///
    /// Fails only if the cost function fails.
    fn run(&mut self, cost: &mut dyn CostFunction, plugins: &mut [&mut dyn Plugin]) -> Result<()>;

    /// The best point found.
    fn x(&self) -> &[f64];

    /// The cost at [`Optimizer::x`].
    fn f(&self) -> f64;

    /// The number of cost evaluations made by the last run.
    fn niter(&self) -> usize;
}

/// Stopping criteria shared by every optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    /// The maximum number of cost evaluations.
    pub max_iter: usize,
    /// The normalized step size at which to stop.
    pub step_tol: f64,
}

impl OptimizerSettings {
    /// Checks that the settings can stop a run.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(Error::InvalidOption {
                name: arcstr::literal!("max_iter"),
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.step_tol > 0.0 && self.step_tol.is_finite()) {
            return Err(Error::InvalidOption {
                name: arcstr::literal!("step_tol"),
                message: format!("must be positive and finite, got {}", self.step_tol),
            });
        }
        Ok(())
    }
}

/// Builds optimizers.
pub trait OptimizerFactory: Send + Sync {
    /// Builds an optimizer for the box `[lo, hi]`.
    fn build(&self, lo: &[f64], hi: &[f64], settings: &OptimizerSettings) -> Box<dyn Optimizer>;
}

/// Builds [`HookeJeeves`] optimizers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookeJeevesFactory;

impl OptimizerFactory for HookeJeevesFactory {
    fn build(&self, lo: &[f64], hi: &[f64], settings: &OptimizerSettings) -> Box<dyn Optimizer> {
        Box::new(HookeJeeves::new(lo, hi, *settings))
    }
}

/// Bounded Hooke-Jeeves pattern search.
///
/// Works in coordinates normalized to `[0, 1]`, starting with a step of
/// `0.25` that is halved whenever an exploratory move finds no improvement.
#[derive(Debug, Clone)]
pub struct HookeJeeves {
    lo: Vec<f64>,
    hi: Vec<f64>,
    settings: OptimizerSettings,
    x0: Vec<f64>,
    x: Vec<f64>,
    f: f64,
    niter: usize,
}

const INITIAL_STEP: f64 = 0.25;

impl HookeJeeves {
    /// Creates an optimizer for the box `[lo, hi]`, starting at `lo`.
    pub fn new(lo: &[f64], hi: &[f64], settings: OptimizerSettings) -> Self {
        Self {
            lo: lo.to_vec(),
            hi: hi.to_vec(),
            settings,
            x0: lo.to_vec(),
            x: lo.to_vec(),
            f: f64::INFINITY,
            niter: 0,
        }
    }
}

impl Optimizer for HookeJeeves {
    fn reset(&mut self, x0: &[f64]) {
        self.x0 = x0.to_vec();
        self.x = x0.to_vec();
        self.f = f64::INFINITY;
        self.niter = 0;
    }

    fn run(&mut self, cost: &mut dyn CostFunction, plugins: &mut [&mut dyn Plugin]) -> Result<()> {
        let mut search = Search {
            lo: &self.lo,
            hi: &self.hi,
            max_iter: self.settings.max_iter,
            cost,
            plugins,
            niter: 0,
            best_u: Vec::new(),
            best_f: f64::INFINITY,
            done: false,
        };

        let mut base: Vec<f64> = self
            .x0
            .iter()
            .enumerate()
            .map(|(i, &x)| search.normalize(i, x))
            .collect();
        let mut f_base = search.probe(&base)?;
        let mut step = INITIAL_STEP;

        while !search.done && step >= self.settings.step_tol {
            let probes = search.niter;
            let (mut trial, mut f_trial) = search.explore(&base, f_base, step)?;
            if search.niter == probes {
                // The step no longer moves any coordinate.
                break;
            }
            if f_trial < f_base {
                // Pattern moves for as long as they keep improving.
                while !search.done {
                    let pattern: Vec<f64> = trial
                        .iter()
                        .zip(&base)
                        .map(|(t, b)| (2.0 * t - b).clamp(0.0, 1.0))
                        .collect();
                    base = trial;
                    f_base = f_trial;
                    let f_pattern = search.probe(&pattern)?;
                    let (next, f_next) = search.explore(&pattern, f_pattern, step)?;
                    if f_next < f_base {
                        trial = next;
                        f_trial = f_next;
                    } else {
                        break;
                    }
                }
            } else {
                step /= 2.0;
            }
        }

        self.niter = search.niter;
        self.f = search.best_f;
        if !search.best_u.is_empty() {
            self.x = search.denormalize(&search.best_u);
        }
        debug!(niter = self.niter, f = self.f, "pattern search finished");
        Ok(())
    }

    fn x(&self) -> &[f64] {
        &self.x
    }

    fn f(&self) -> f64 {
        self.f
    }

    fn niter(&self) -> usize {
        self.niter
    }
}

struct Search<'a, 'c, 'p> {
    lo: &'a [f64],
    hi: &'a [f64],
    max_iter: usize,
    cost: &'a mut (dyn CostFunction + 'c),
    plugins: &'a mut [&'p mut dyn Plugin],
    niter: usize,
    best_u: Vec<f64>,
    best_f: f64,
    done: bool,
}

impl Search<'_, '_, '_> {
    fn normalize(&self, i: usize, x: f64) -> f64 {
        let span = self.hi[i] - self.lo[i];
        if span > 0.0 {
            ((x - self.lo[i]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn denormalize(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, &u)| self.lo[i] + u * (self.hi[i] - self.lo[i]))
            .collect()
    }

    /// Evaluates the cost at normalized point `u`.
    ///
    /// Returns infinity without evaluating once the search is done.
    fn probe(&mut self, u: &[f64]) -> Result<f64> {
        if self.done {
            return Ok(f64::INFINITY);
        }
        let x = self.denormalize(u);
        let evaluated = self.cost.evaluate(&x)?;
        self.niter += 1;
        for plugin in self.plugins.iter_mut() {
            plugin.on_evaluation(self.niter, &x, &evaluated);
        }
        if evaluated.cost < self.best_f || self.best_u.is_empty() {
            self.best_f = evaluated.cost;
            self.best_u = u.to_vec();
        }
        if self.niter >= self.max_iter || self.plugins.iter().any(|p| p.should_stop()) {
            self.done = true;
        }
        Ok(evaluated.cost)
    }

    /// Tries a step in each direction along each coordinate, keeping improvements.
    fn explore(&mut self, base: &[f64], f_base: f64, step: f64) -> Result<(Vec<f64>, f64)> {
        let mut u = base.to_vec();
        let mut f = f_base;
        for i in 0..u.len() {
            for delta in [step, -step] {
                let original = u[i];
                let moved = (original + delta).clamp(0.0, 1.0);
                if moved == original {
                    continue;
                }
                u[i] = moved;
                let f_moved = self.probe(&u)?;
                if f_moved < f {
                    f = f_moved;
                    break;
                }
                u[i] = original;
            }
        }
        Ok((u, f))
    }
}

/// Accumulates the analysis counts of every evaluation.
#[derive(Debug, Clone, Default)]
pub struct AnnotationCollector {
    /// The accumulated counts.
    pub counts: AnalysisCount,
}

impl Plugin for AnnotationCollector {
    fn on_evaluation(&mut self, _iter: usize, _x: &[f64], evaluated: &Evaluated) {
        self.counts.merge(&evaluated.annotation.counts);
    }
}

/// Logs every evaluation and records it in a results sink.
pub struct IterationReporter {
    names: Vec<ArcStr>,
    sink: Option<(Arc<dyn ResultsSink>, RecordId)>,
}

impl IterationReporter {
    /// Creates a reporter for parameters named `names`.
    ///
    /// If `sink` is given, every iteration is committed under the given record.
    pub fn new(names: Vec<ArcStr>, sink: Option<(Arc<dyn ResultsSink>, RecordId)>) -> Self {
        Self { names, sink }
    }

    fn pass(&self) -> Option<usize> {
        let (sink, parent) = self.sink.as_ref()?;
        let id = sink.ancestor(*parent, RecordKind::Pass)?;
        match sink.record(id)? {
            Record::Pass(pass) => Some(pass.pass),
            _ => None,
        }
    }
}

impl Plugin for IterationReporter {
    fn on_evaluation(&mut self, iter: usize, x: &[f64], evaluated: &Evaluated) {
        let params: ParamMap = self.names.iter().cloned().zip(x.iter().copied()).collect();
        debug!(
            pass = self.pass(),
            iter,
            cost = evaluated.cost,
            fulfilled = evaluated.annotation.aggregate.all_fulfilled(),
            "evaluated {:?}",
            params
        );
        if let Some((sink, parent)) = &self.sink {
            sink.commit(
                Some(*parent),
                Record::Iteration(IterationRecord {
                    iter,
                    params,
                    cost: evaluated.cost,
                    aggregate: evaluated.annotation.aggregate.clone(),
                    results: evaluated.annotation.results.clone(),
                }),
            );
        }
    }
}

/// Stops the optimizer once every requirement is fulfilled.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopWhenFulfilled {
    fulfilled: bool,
}

impl Plugin for StopWhenFulfilled {
    fn on_evaluation(&mut self, _iter: usize, _x: &[f64], evaluated: &Evaluated) {
        self.fulfilled = evaluated.annotation.aggregate.all_fulfilled();
    }

    fn should_stop(&self) -> bool {
        self.fulfilled
    }
}
