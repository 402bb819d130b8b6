//! Per-run state passed through compilation, dispatch and aggregation.

use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::problem::{ParamMap, Problem};

/// The number of successful simulator invocations, by analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCount(IndexMap<ArcStr, usize>);

impl AnalysisCount {
    /// Creates an empty count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` invocations of `analysis`.
    pub fn add(&mut self, analysis: &ArcStr, n: usize) {
        *self.0.entry(analysis.clone()).or_default() += n;
    }

    /// The number of invocations of `analysis`.
    pub fn get(&self, analysis: &str) -> usize {
        self.0.get(analysis).copied().unwrap_or_default()
    }

    /// The total number of invocations.
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// Adds every count in `other` to this count.
    pub fn merge(&mut self, other: &AnalysisCount) {
        for (analysis, &n) in &other.0 {
            self.add(analysis, n);
        }
    }

    /// Iterates over analyses and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, usize)> {
        self.0.iter().map(|(k, &v)| (k, v))
    }
}

/// Read-only run inputs together with the analysis counts accumulated so far.
///
/// Stages never mutate a context in place. They return a new context
/// carrying their additional counts instead.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    fixed_params: Arc<ParamMap>,
    variables: Arc<IndexMap<ArcStr, mexpr::Value>>,
    counts: AnalysisCount,
}

impl RunContext {
    /// Creates a context with no accumulated counts.
    pub fn new(fixed_params: ParamMap, variables: IndexMap<ArcStr, mexpr::Value>) -> Self {
        Self {
            fixed_params: Arc::new(fixed_params),
            variables: Arc::new(variables),
            counts: AnalysisCount::new(),
        }
    }

    /// Creates a context from a problem's fixed parameters and variables.
    pub fn from_problem(problem: &Problem) -> Self {
        Self::new(
            problem.fixed_params.clone(),
            problem
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
        )
    }

    /// Parameters merged into every job's input parameters.
    pub fn fixed_params(&self) -> &ParamMap {
        &self.fixed_params
    }

    /// Variables visible to every measure expression.
    pub fn variables(&self) -> &IndexMap<ArcStr, mexpr::Value> {
        &self.variables
    }

    /// Analysis counts accumulated so far.
    pub fn counts(&self) -> &AnalysisCount {
        &self.counts
    }

    /// An expression environment holding the fixed variables.
    pub fn environment(&self) -> mexpr::Environment {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a context with `counts` added to the accumulated counts.
    pub fn with_counts(&self, counts: &AnalysisCount) -> Self {
        let mut next = self.clone();
        next.counts.merge(counts);
        next
    }
}
