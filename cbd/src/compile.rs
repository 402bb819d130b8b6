//! The job graph compiler.
//!
//! Resolves which corners every measure can be evaluated in, which
//! (corner, analysis) jobs must run, which measures each job computes, and
//! the merged modules, parameters and options handed to simulators.

use std::collections::HashMap;
use std::fmt::Display;

use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::merge::merge_layers;
use crate::problem::{Analysis, Corner, Head, Measure, ModuleDef, OptionMap, ParamMap, Problem};
use crate::validation::{Cause, Issues};

/// The unit of simulator execution.
///
/// Keys without an analysis stand for dependent-measure evaluation, which
/// runs no simulation.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobKey {
    /// The corner.
    pub corner: ArcStr,
    /// The analysis, if any.
    pub analysis: Option<ArcStr>,
}

impl JobKey {
    /// A key for running `analysis` in `corner`.
    pub fn new(corner: impl Into<ArcStr>, analysis: impl Into<ArcStr>) -> Self {
        Self {
            corner: corner.into(),
            analysis: Some(analysis.into()),
        }
    }

    /// A key for evaluating dependent measures in `corner`.
    pub fn dependent(corner: impl Into<ArcStr>) -> Self {
        Self {
            corner: corner.into(),
            analysis: None,
        }
    }
}

impl Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.analysis {
            Some(analysis) => write!(f, "{}/{}", self.corner, analysis),
            None => write!(f, "{}/-", self.corner),
        }
    }
}

/// Everything a simulator needs to run one (corner, analysis) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// A unique name, `<corner>_<analysis>`.
    pub name: ArcStr,
    /// The job key.
    pub key: JobKey,
    /// The head the job runs on.
    pub head: ArcStr,
    /// Modules to load, resolved to their definitions.
    pub modules: IndexMap<ArcStr, ModuleDef>,
    /// Merged parameters.
    pub params: ParamMap,
    /// Merged simulator options.
    pub options: OptionMap,
    /// Quantities to save.
    pub saves: Vec<ArcStr>,
    /// The analysis command.
    pub command: Option<ArcStr>,
}

/// The definitions that stay fixed across a design run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Definitions {
    /// Simulator heads, by name.
    pub heads: IndexMap<ArcStr, Head>,
    /// Analyses, by name.
    pub analyses: IndexMap<ArcStr, Analysis>,
    /// Corners, by name.
    pub corners: IndexMap<ArcStr, Corner>,
    /// Parameters with the lowest priority in every job.
    pub fixed_params: ParamMap,
}

impl Definitions {
    /// Extracts the definitions of a problem.
    pub fn from_problem(problem: &Problem) -> Self {
        Self {
            heads: problem.heads.clone(),
            analyses: problem.analyses.clone(),
            corners: problem.corner_map(),
            fixed_params: problem.fixed_params.clone(),
        }
    }
}

/// Options controlling compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// Schedule every valid job, ignoring per-measure corner lists.
    pub full: bool,
    /// The canonical corner order. Corner sets keep insertion order if not given.
    pub corner_order: Option<Vec<ArcStr>>,
}

impl CompileOptions {
    /// Options for a full evaluation.
    pub fn full() -> Self {
        Self {
            full: true,
            corner_order: None,
        }
    }

    /// Sets the canonical corner order.
    pub fn with_corner_order(mut self, order: Option<Vec<ArcStr>>) -> Self {
        self.corner_order = order;
        self
    }
}

/// The compiled job graph.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    /// Jobs to run, by head.
    pub jobs: IndexMap<ArcStr, Vec<Job>>,
    /// The measures computed at each job key.
    pub job_measures: IndexMap<JobKey, IndexSet<ArcStr>>,
    /// The corners each required measure is evaluated in.
    pub measure_corners: IndexMap<ArcStr, IndexSet<ArcStr>>,
    /// The corners each analysis runs in.
    pub analysis_corners: IndexMap<ArcStr, IndexSet<ArcStr>>,
    /// The corners each measure can be evaluated in.
    pub admissible: IndexMap<ArcStr, IndexSet<ArcStr>>,
    /// The measures that must be evaluated.
    pub required: IndexSet<ArcStr>,
    /// Required dependent measures, in evaluation order.
    pub dependent_order: Vec<ArcStr>,
    /// Issues that did not prevent compilation.
    pub warnings: Issues,
}

impl JobGraph {
    /// Compiles the job graph for the `active` measures.
    ///
    /// Fails with [`Error::Compile`] if the definitions are inconsistent.
    pub fn compile(
        defs: &Definitions,
        measures: &IndexMap<ArcStr, Measure>,
        active: &[ArcStr],
        options: &CompileOptions,
    ) -> Result<Self> {
        let mut issues = Issues::new();
        let mut graph = Compiler {
            defs,
            measures,
            issues: &mut issues,
        }
        .compile(active, options);
        if issues.has_error() {
            return Err(Error::Compile(issues));
        }
        graph.warnings = issues;
        debug!(
            jobs = graph.num_jobs(),
            measures = graph.required.len(),
            full = options.full,
            "compiled job graph"
        );
        Ok(graph)
    }

    /// The total number of simulator jobs.
    pub fn num_jobs(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }

    /// The measures computed at `key`.
    pub fn measures_at(&self, key: &JobKey) -> impl Iterator<Item = &ArcStr> {
        self.job_measures.get(key).into_iter().flatten()
    }
}

struct Compiler<'a> {
    defs: &'a Definitions,
    measures: &'a IndexMap<ArcStr, Measure>,
    issues: &'a mut Issues,
}

impl Compiler<'_> {
    fn compile(&mut self, active: &[ArcStr], options: &CompileOptions) -> JobGraph {
        self.check_names();
        let head_corners = self.head_corners();
        self.check_analyses();
        let order = self.dependency_order();
        let admissible = self.admissible(&head_corners, &order);
        let explicit = self.explicit_corners(&admissible);

        let mut graph = JobGraph {
            admissible: admissible.clone(),
            ..Default::default()
        };

        // Transitive closure of required measures.
        let mut required = IndexSet::new();
        for name in active {
            if self.measures.contains_key(name) {
                required.insert(name.clone());
            } else {
                self.issues
                    .error(Cause::UndefinedMeasure { name: name.clone() });
            }
        }
        if options.full {
            required = self.measures.keys().cloned().collect();
        }
        let mut i = 0;
        while i < required.len() {
            let name = required[i].clone();
            if let Some(measure) = self.measures.get(&name) {
                for dep in &measure.depends {
                    if self.measures.contains_key(dep) {
                        required.insert(dep.clone());
                    }
                }
            }
            i += 1;
        }

        // Corners each measure is needed in, with dependent needs propagated
        // backwards to dependencies. Dependents come after their dependencies
        // in `order`, so a single reverse sweep reaches the fixpoint.
        let mut needed: IndexMap<ArcStr, IndexSet<ArcStr>> = required
            .iter()
            .map(|name| {
                let corners = if options.full {
                    admissible.get(name).cloned().unwrap_or_default()
                } else {
                    explicit
                        .get(name)
                        .cloned()
                        .or_else(|| admissible.get(name).cloned())
                        .unwrap_or_default()
                };
                (name.clone(), corners)
            })
            .collect();
        for name in order.iter().rev() {
            let measure = &self.measures[name];
            if !measure.is_dependent() || !needed.contains_key(name) {
                continue;
            }
            let corners = needed[name].clone();
            for dep in &measure.depends {
                if let Some(dep_corners) = needed.get_mut(dep) {
                    dep_corners.extend(corners.iter().cloned());
                }
            }
        }

        // Job keys.
        for (name, corners) in &needed {
            let measure = &self.measures[name];
            for corner in corners {
                let key = match &measure.analysis {
                    Some(analysis) => {
                        if !self.defs.analyses.contains_key(analysis) {
                            continue;
                        }
                        graph
                            .analysis_corners
                            .entry(analysis.clone())
                            .or_default()
                            .insert(corner.clone());
                        JobKey::new(corner.clone(), analysis.clone())
                    }
                    None => JobKey::dependent(corner.clone()),
                };
                graph
                    .job_measures
                    .entry(key)
                    .or_default()
                    .insert(name.clone());
            }
        }

        if options.full {
            for (name, analysis) in &self.defs.analyses {
                let Some(corners) = head_corners.get(&analysis.head) else {
                    continue;
                };
                for corner in corners {
                    graph
                        .analysis_corners
                        .entry(name.clone())
                        .or_default()
                        .insert(corner.clone());
                    graph
                        .job_measures
                        .entry(JobKey::new(corner.clone(), name.clone()))
                        .or_default();
                }
            }
            for corner in self.defs.corners.keys() {
                graph
                    .job_measures
                    .entry(JobKey::dependent(corner.clone()))
                    .or_default();
            }
        }

        graph.dependent_order = order
            .iter()
            .filter(|name| required.contains(*name) && self.measures[*name].is_dependent())
            .cloned()
            .collect();

        if let Some(order) = &options.corner_order {
            let position: HashMap<&ArcStr, usize> =
                order.iter().enumerate().map(|(i, c)| (c, i)).collect();
            let rank = |c: &ArcStr| position.get(c).copied().unwrap_or(usize::MAX);
            let sort = |set: &mut IndexSet<ArcStr>| set.sort_by(|a, b| rank(a).cmp(&rank(b)));
            needed.values_mut().for_each(sort);
            graph.analysis_corners.values_mut().for_each(sort);
            graph.admissible.values_mut().for_each(sort);
        }

        // Job material, in analysis definition order.
        let defs = self.defs;
        graph.analysis_corners.sort_by(|a, _, b, _| {
            defs.analyses
                .get_index_of(a)
                .cmp(&defs.analyses.get_index_of(b))
        });
        for (analysis_name, corners) in &graph.analysis_corners {
            let analysis = &defs.analyses[analysis_name];
            let Some(head) = defs.heads.get(&analysis.head) else {
                continue;
            };
            for corner_name in corners {
                if let Some(job) = self.job(corner_name, analysis_name, analysis, head) {
                    graph
                        .jobs
                        .entry(analysis.head.clone())
                        .or_default()
                        .push(job);
                }
            }
        }
        graph.measure_corners = needed;
        graph.required = required;
        graph
    }

    fn check_names(&mut self) {
        for name in self.defs.corners.keys() {
            self.issues.check_name("corner", name);
        }
        for name in self.measures.keys() {
            self.issues.check_name("measure", name);
        }
    }

    /// Step 1: the corners each head can run in.
    fn head_corners(&mut self) -> IndexMap<ArcStr, IndexSet<ArcStr>> {
        let mut head_corners: IndexMap<ArcStr, IndexSet<ArcStr>> = self
            .defs
            .heads
            .keys()
            .map(|name| (name.clone(), IndexSet::new()))
            .collect();

        for (corner_name, corner) in &self.defs.corners {
            let heads: Vec<&ArcStr> = if corner.heads.is_empty() {
                self.defs.heads.keys().collect()
            } else {
                corner.heads.iter().collect()
            };
            for head_name in heads {
                let Some(head) = self.defs.heads.get(head_name) else {
                    self.issues.error(Cause::UndefinedCornerHead {
                        corner: corner_name.clone(),
                        head: head_name.clone(),
                    });
                    continue;
                };
                let mut valid = true;
                for module in &corner.modules {
                    if !head.modules.contains_key(module) {
                        self.issues.error(Cause::UndefinedCornerModule {
                            corner: corner_name.clone(),
                            head: head_name.clone(),
                            module: module.clone(),
                        });
                        valid = false;
                    }
                }
                if valid {
                    head_corners[head_name].insert(corner_name.clone());
                }
            }
        }

        for (head, corners) in &head_corners {
            if corners.is_empty() {
                self.issues.warn(Cause::UnusedHead { head: head.clone() });
            }
        }
        head_corners
    }

    fn check_analyses(&mut self) {
        for (name, analysis) in &self.defs.analyses {
            let Some(head) = self.defs.heads.get(&analysis.head) else {
                self.issues.error(Cause::UndefinedHead {
                    analysis: name.clone(),
                    head: analysis.head.clone(),
                });
                continue;
            };
            for module in &analysis.modules {
                if !head.modules.contains_key(module) {
                    self.issues.error(Cause::UndefinedAnalysisModule {
                        analysis: name.clone(),
                        head: analysis.head.clone(),
                        module: module.clone(),
                    });
                }
            }
        }
    }

    /// Orders measures so that every measure comes after its dependencies.
    ///
    /// Reports undefined dependencies and dependency cycles.
    fn dependency_order(&mut self) -> Vec<ArcStr> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            name: &ArcStr,
            measures: &IndexMap<ArcStr, Measure>,
            marks: &mut HashMap<ArcStr, Mark>,
            stack: &mut Vec<ArcStr>,
            order: &mut Vec<ArcStr>,
            issues: &mut Issues,
        ) {
            match marks.get(name) {
                Some(Mark::Done) => return,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|m| m == name).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(name.clone());
                    issues.error(Cause::DependencyCycle { measures: cycle });
                    return;
                }
                None => {}
            }
            marks.insert(name.clone(), Mark::Visiting);
            stack.push(name.clone());
            for dep in &measures[name].depends {
                if measures.contains_key(dep) {
                    visit(dep, measures, marks, stack, order, issues);
                } else {
                    issues.error(Cause::UndefinedDependency {
                        measure: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            stack.pop();
            marks.insert(name.clone(), Mark::Done);
            order.push(name.clone());
        }

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(self.measures.len());
        for name in self.measures.keys() {
            visit(
                name,
                self.measures,
                &mut marks,
                &mut Vec::new(),
                &mut order,
                self.issues,
            );
        }
        order
    }

    /// Steps 2 and 3: the corners each measure can be evaluated in.
    fn admissible(
        &mut self,
        head_corners: &IndexMap<ArcStr, IndexSet<ArcStr>>,
        order: &[ArcStr],
    ) -> IndexMap<ArcStr, IndexSet<ArcStr>> {
        let mut admissible: IndexMap<ArcStr, IndexSet<ArcStr>> = IndexMap::new();
        for name in order {
            let measure = &self.measures[name];
            let corners = match &measure.analysis {
                Some(analysis_name) => {
                    let Some(analysis) = self.defs.analyses.get(analysis_name) else {
                        self.issues.error(Cause::UndefinedAnalysis {
                            measure: name.clone(),
                            analysis: analysis_name.clone(),
                        });
                        admissible.insert(name.clone(), IndexSet::new());
                        continue;
                    };
                    head_corners
                        .get(&analysis.head)
                        .cloned()
                        .unwrap_or_default()
                }
                None if measure.depends.is_empty() => self.defs.corners.keys().cloned().collect(),
                None => {
                    let mut deps = measure
                        .depends
                        .iter()
                        .filter_map(|dep| admissible.get(dep));
                    let first = deps.next().cloned().unwrap_or_default();
                    deps.fold(first, |acc, set| {
                        acc.into_iter().filter(|c| set.contains(c)).collect()
                    })
                }
            };
            if corners.is_empty() {
                self.issues.error(Cause::NoAdmissibleCorners {
                    measure: name.clone(),
                });
            }
            admissible.insert(name.clone(), corners);
        }
        admissible
    }

    /// Step 4: validated explicit corner lists.
    fn explicit_corners(
        &mut self,
        admissible: &IndexMap<ArcStr, IndexSet<ArcStr>>,
    ) -> IndexMap<ArcStr, IndexSet<ArcStr>> {
        let mut explicit = IndexMap::new();
        for (name, measure) in self.measures {
            let Some(list) = &measure.corners else {
                continue;
            };
            let mut corners = IndexSet::new();
            for corner in list {
                if !corners.insert(corner.clone()) {
                    self.issues.error(Cause::DuplicateCorner {
                        measure: name.clone(),
                        corner: corner.clone(),
                    });
                } else if !self.defs.corners.contains_key(corner) {
                    self.issues.error(Cause::UndefinedCorner {
                        measure: name.clone(),
                        corner: corner.clone(),
                    });
                } else if !admissible.get(name).is_some_and(|set| set.contains(corner)) {
                    self.issues.error(Cause::InadmissibleCorner {
                        measure: name.clone(),
                        corner: corner.clone(),
                    });
                }
            }
            explicit.insert(name.clone(), corners);
        }
        explicit
    }

    /// Step 8: merged job material.
    fn job(
        &mut self,
        corner_name: &ArcStr,
        analysis_name: &ArcStr,
        analysis: &Analysis,
        head: &Head,
    ) -> Option<Job> {
        let corner = &self.defs.corners[corner_name];
        let mut modules = IndexMap::new();
        let mut valid = true;
        for module in corner.modules.iter().chain(&analysis.modules) {
            let Some(def) = head.modules.get(module) else {
                // Already reported while validating corners and analyses.
                valid = false;
                continue;
            };
            if modules.insert(module.clone(), def.clone()).is_some() {
                self.issues.error(Cause::DuplicateModule {
                    corner: corner_name.clone(),
                    analysis: analysis_name.clone(),
                    module: module.clone(),
                });
                valid = false;
            }
        }
        if !valid {
            return None;
        }

        Some(Job {
            name: arcstr::format!("{}_{}", corner_name, analysis_name),
            key: JobKey::new(corner_name.clone(), analysis_name.clone()),
            head: analysis.head.clone(),
            modules,
            params: merge_layers([
                &self.defs.fixed_params,
                &head.params,
                &corner.params,
                &analysis.params,
            ]),
            options: merge_layers([&head.options, &analysis.options]),
            saves: analysis.saves.clone(),
            command: analysis.command.clone(),
        })
    }
}
