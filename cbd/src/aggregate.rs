//! Cost aggregation.
//!
//! Reduces per-corner measure values into one scalar cost. Every bound of
//! every requirement becomes one [`AggregatorEntry`]: the deviation from the
//! goal is normalized, shaped, and reduced across corners.

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dispatch::{MeasureResults, MeasureValue};
use crate::problem::Requirement;

/// The direction of a bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Goal {
    /// The measure must be at least this value.
    Above(f64),
    /// The measure must be at most this value.
    Below(f64),
}

impl Goal {
    /// The goal value.
    pub fn value(&self) -> f64 {
        match *self {
            Self::Above(g) | Self::Below(g) => g,
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above(g) => write!(f, ">= {g}"),
            Self::Below(g) => write!(f, "<= {g}"),
        }
    }
}

/// Normalizes a measure value into a deviation from its goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Norm {
    /// The goal.
    pub goal: Goal,
    /// The normalization scale.
    pub norm: f64,
    /// The deviation assigned to a failed evaluation.
    pub failure: f64,
}

impl Norm {
    /// The normalized deviation of `value`. Positive values violate the goal.
    ///
    /// The deviation of a vector is that of its worst element.
    pub fn deviation(&self, value: &MeasureValue) -> f64 {
        value
            .as_slice()
            .iter()
            .map(|&v| match self.goal {
                Goal::Above(g) => (g - v) / self.norm,
                Goal::Below(g) => (v - g) / self.norm,
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Maps deviations to cost contributions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// `weight * d` for violations, `tradeoff * d` otherwise.
    ///
    /// A zero tradeoff makes every compliant value cost nothing. A positive
    /// tradeoff rewards pushing past the goal.
    Linear {
        /// The weight of violations.
        weight: f64,
        /// The weight of compliant deviations.
        tradeoff: f64,
    },
}

impl Shape {
    /// A linear shape with unit weight.
    pub fn linear(tradeoff: f64) -> Self {
        Self::Linear {
            weight: 1.0,
            tradeoff,
        }
    }

    /// Applies the shape to a deviation.
    pub fn apply(&self, d: f64) -> f64 {
        match *self {
            Self::Linear { weight, tradeoff } => {
                if d > 0.0 {
                    weight * d
                } else {
                    tradeoff * d
                }
            }
        }
    }

    /// Returns `true` if the shape rewards pushing past the goal.
    pub fn has_tradeoff(&self) -> bool {
        match *self {
            Self::Linear { tradeoff, .. } => tradeoff != 0.0,
        }
    }
}

/// How an entry's per-corner contributions are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    /// The worst corner's contribution.
    #[default]
    Worst,
    /// Evaluated and reported, but contributes nothing to the cost.
    Excluded,
}

/// One bound of one measure's requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorEntry {
    /// The measure.
    pub measure: ArcStr,
    /// The normalization.
    pub norm: Norm,
    /// The shape.
    pub shape: Shape,
    /// The reduction.
    pub reduction: Reduction,
}

/// The aggregation result for one [`AggregatorEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryResult {
    /// The measure.
    pub measure: ArcStr,
    /// The goal.
    pub goal: Goal,
    /// The value at the worst corner. [`None`] if any corner failed.
    pub worst_value: Option<f64>,
    /// The worst corner, or the first failed corner if any corner failed.
    pub worst_corner: Option<ArcStr>,
    /// Corners at which the measure failed to evaluate.
    pub failed_corners: Vec<ArcStr>,
    /// Whether the goal is met at every corner.
    pub fulfilled: bool,
    /// The shaped contribution of the worst corner.
    pub contribution: f64,
    /// Whether the entry is excluded from the cost.
    pub excluded: bool,
}

/// The output of [`Aggregator::aggregate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// The total cost.
    pub cost: f64,
    /// Per-entry diagnostics, in entry order.
    pub entries: Vec<EntryResult>,
}

impl Aggregate {
    /// Returns `true` if every entry that is not excluded is fulfilled.
    pub fn all_fulfilled(&self) -> bool {
        self.entries.iter().filter(|e| !e.excluded).all(|e| e.fulfilled)
    }
}

/// Reduces measure results into a scalar cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregator {
    entries: Vec<AggregatorEntry>,
}

impl Aggregator {
    /// Creates an aggregator from explicit entries.
    pub fn new(entries: Vec<AggregatorEntry>) -> Self {
        Self { entries }
    }

    /// Builds one entry per bound of every requirement.
    ///
    /// `failure_penalty` applies to requirements without their own failure cost.
    pub fn from_requirements(
        requirements: &IndexMap<ArcStr, Requirement>,
        failure_penalty: f64,
    ) -> Self {
        let mut entries = Vec::new();
        for (measure, req) in requirements {
            let norm = req.norm.unwrap_or_else(|| default_norm(req.lower, req.upper));
            let failure = req.failure.unwrap_or(failure_penalty);
            let reduction = if req.exclude {
                Reduction::Excluded
            } else {
                Reduction::Worst
            };
            let goals = req
                .lower
                .map(Goal::Above)
                .into_iter()
                .chain(req.upper.map(Goal::Below));
            for goal in goals {
                entries.push(AggregatorEntry {
                    measure: measure.clone(),
                    norm: Norm {
                        goal,
                        norm,
                        failure,
                    },
                    shape: Shape::linear(req.tradeoff),
                    reduction,
                });
            }
        }
        Self { entries }
    }

    /// The entries.
    pub fn entries(&self) -> &[AggregatorEntry] {
        &self.entries
    }

    /// Returns `true` if any entry that is not excluded rewards pushing past its goal.
    pub fn has_tradeoffs(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.reduction != Reduction::Excluded && e.shape.has_tradeoff())
    }

    /// Aggregates `results`.
    ///
    /// Measures missing from `results` are treated as evaluated in no corner.
    pub fn aggregate(&self, results: &MeasureResults) -> Aggregate {
        let empty = IndexMap::new();
        let entries: Vec<EntryResult> = self
            .entries
            .iter()
            .map(|entry| {
                let corners = results.get(&entry.measure).unwrap_or(&empty);
                reduce(entry, corners)
            })
            .collect();
        let cost = entries.iter().map(|e| e.contribution).sum();
        Aggregate { cost, entries }
    }
}

/// The default normalization scale for a requirement with the given bounds.
pub fn default_norm(lower: Option<f64>, upper: Option<f64>) -> f64 {
    let norm = lower
        .into_iter()
        .chain(upper)
        .map(f64::abs)
        .fold(0.0, f64::max);
    if norm == 0.0 {
        1.0
    } else {
        norm
    }
}

fn reduce(entry: &AggregatorEntry, corners: &IndexMap<ArcStr, Option<MeasureValue>>) -> EntryResult {
    let excluded = entry.reduction == Reduction::Excluded;
    let failed_corners: Vec<ArcStr> = corners
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(c, _)| c.clone())
        .collect();

    let mut result = EntryResult {
        measure: entry.measure.clone(),
        goal: entry.norm.goal,
        worst_value: None,
        worst_corner: None,
        failed_corners: Vec::new(),
        fulfilled: true,
        contribution: 0.0,
        excluded,
    };

    if let Some(first) = failed_corners.first() {
        result.worst_corner = Some(first.clone());
        result.fulfilled = false;
        result.contribution = entry.shape.apply(entry.norm.failure);
        result.failed_corners = failed_corners;
    } else {
        // Shapes are monotonic in the deviation. Strict comparison keeps the
        // first corner on ties.
        let mut worst: Option<(&ArcStr, &MeasureValue, f64)> = None;
        for (corner, value) in corners {
            let Some(value) = value else { continue };
            let d = entry.norm.deviation(value);
            if worst.map_or(true, |(_, _, wd)| d > wd) {
                worst = Some((corner, value, d));
            }
        }
        if let Some((corner, value, d)) = worst {
            result.worst_corner = Some(corner.clone());
            result.worst_value = Some(worst_element(entry.norm.goal, value));
            result.fulfilled = d <= 0.0;
            result.contribution = entry.shape.apply(d);
        }
    }

    if excluded {
        result.contribution = 0.0;
    }
    result
}

/// The element of `value` farthest on the wrong side of `goal`.
fn worst_element(goal: Goal, value: &MeasureValue) -> f64 {
    let values = value.as_slice().iter().copied();
    match goal {
        Goal::Above(_) => values.fold(f64::INFINITY, f64::min),
        Goal::Below(_) => values.fold(f64::NEG_INFINITY, f64::max),
    }
}
