//! The simulator backend contract.

use std::any::Any;
use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::compile::Job;
use crate::problem::ParamMap;

/// A structured simulation result.
pub trait SimResult: Send + Sync {
    /// The variables and accessor functions measure expressions can use.
    fn environment(&self) -> mexpr::Environment;
}

/// The jobs of one head, dispatched together.
#[derive(Debug, Clone, PartialEq)]
pub struct JobBatch {
    /// The jobs.
    pub jobs: Vec<Job>,
    /// Input parameters: the design parameters merged with the fixed parameters.
    pub params: ParamMap,
}

/// The outcome of running one job group.
pub struct GroupStatus {
    /// Indices of the jobs that ran to completion.
    pub jobs: Vec<usize>,
    payload: Box<dyn Any + Send + Sync>,
}

impl GroupStatus {
    /// Creates a status with a backend-defined payload.
    pub fn new(jobs: Vec<usize>, payload: impl Any + Send + Sync) -> Self {
        Self {
            jobs,
            payload: Box::new(payload),
        }
    }

    /// Creates a status without a payload.
    pub fn completed(jobs: Vec<usize>) -> Self {
        Self::new(jobs, ())
    }

    /// The payload, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl std::fmt::Debug for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupStatus")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

/// A simulator backend.
///
/// Groups may run concurrently on different workers, so implementations
/// must keep per-group state local to [`Simulator::run_group`].
pub trait Simulator: Send + Sync {
    /// Partitions the batch's jobs into groups that run together.
    ///
    /// Every job index must appear in exactly one group. The default runs
    /// every job on its own.
    fn group_jobs(&self, batch: &JobBatch) -> Vec<Vec<usize>> {
        (0..batch.jobs.len()).map(|i| vec![i]).collect()
    }

    /// Runs the jobs in `group`.
    fn run_group(&self, batch: &JobBatch, group: &[usize]) -> anyhow::Result<GroupStatus>;

    /// Reads the result of job `job` after its group ran.
    ///
    /// Returns [`None`] if the result is missing or unreadable.
    fn read_result(
        &self,
        batch: &JobBatch,
        job: usize,
        status: &GroupStatus,
    ) -> Option<Arc<dyn SimResult>>;

    /// Removes intermediate files once every group of the batch is done.
    fn cleanup(&self, _batch: &JobBatch) {}
}

/// Simulator backends, by simulator id.
#[derive(Clone, Default)]
pub struct Simulators {
    backends: IndexMap<ArcStr, Arc<dyn Simulator>>,
}

impl Simulators {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend, replacing any backend with the same id.
    pub fn register(&mut self, id: impl Into<ArcStr>, simulator: impl Simulator + 'static) {
        self.backends.insert(id.into(), Arc::new(simulator));
    }

    /// Registers a backend, returning the registry.
    pub fn with(mut self, id: impl Into<ArcStr>, simulator: impl Simulator + 'static) -> Self {
        self.register(id, simulator);
        self
    }

    /// Looks up a backend.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Simulator>> {
        self.backends.get(id)
    }
}

impl std::fmt::Debug for Simulators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.backends.keys()).finish()
    }
}

/// Checks that `groups` partitions `0..n`.
pub(crate) fn check_partition(groups: &[Vec<usize>], n: usize) -> Result<(), String> {
    let mut seen = vec![false; n];
    for &i in groups.iter().flatten() {
        match seen.get_mut(i) {
            None => return Err(format!("job index {i} is out of range for {n} job(s)")),
            Some(true) => return Err(format!("job index {i} appears in more than one group")),
            Some(slot) => *slot = true,
        }
    }
    match seen.iter().position(|s| !s) {
        Some(i) => Err(format!("job index {i} is not in any group")),
        None => Ok(()),
    }
}
