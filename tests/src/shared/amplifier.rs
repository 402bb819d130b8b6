//! A simulator backend evaluating a closed-form amplifier model.
//!
//! Every job computes `gain = k * x`, where `x` is a design parameter and
//! `k` is a per-corner parameter, and `bw = 1000 / gain`.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use arcstr::ArcStr;
use indexmap::{IndexMap, IndexSet};
use mexpr::{Environment, EvalError, Value};

use cbd::simulator::{GroupStatus, JobBatch, SimResult, Simulator};

/// How [`Amplifier`] partitions a batch into groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Grouping {
    /// One group per job.
    #[default]
    PerJob,
    /// One group for the whole batch.
    PerBatch,
    /// Every job twice. Not a valid partition.
    Duplicated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmpResult {
    pub gain: f64,
    pub bw: f64,
}

impl SimResult for AmpResult {
    fn environment(&self) -> Environment {
        let gain = self.gain;
        Environment::new()
            .with_var("gain", self.gain)
            .with_var("bw", self.bw)
            .with_var("wave", vec![gain, 2.0 * gain, 3.0 * gain])
            .with_fn("vout", move |args| match args {
                [Value::Real(t)] => Ok(Value::Real(gain * t)),
                _ => Err(EvalError::Host("`vout` expects one real argument".to_string())),
            })
    }
}

type Outputs = IndexMap<usize, Arc<AmpResult>>;

#[derive(Debug, Clone, Default)]
pub struct Amplifier {
    runs: Arc<Mutex<Vec<ArcStr>>>,
    cleanups: Arc<Mutex<usize>>,
    unreadable: IndexSet<ArcStr>,
    failing: IndexSet<ArcStr>,
    panicking: IndexSet<ArcStr>,
    grouping: Grouping,
}

impl Amplifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the named job but produces no result for it.
    pub fn unreadable(mut self, job: &str) -> Self {
        self.unreadable.insert(job.into());
        self
    }

    /// Fails every group containing the named job.
    pub fn failing(mut self, job: &str) -> Self {
        self.failing.insert(job.into());
        self
    }

    /// Panics in every group containing the named job.
    pub fn panicking(mut self, job: &str) -> Self {
        self.panicking.insert(job.into());
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    /// The names of every job run so far, in completion order.
    pub fn runs(&self) -> Vec<ArcStr> {
        self.runs.lock().unwrap().clone()
    }

    pub fn cleanups(&self) -> usize {
        *self.cleanups.lock().unwrap()
    }
}

impl Simulator for Amplifier {
    fn group_jobs(&self, batch: &JobBatch) -> Vec<Vec<usize>> {
        let n = batch.jobs.len();
        match self.grouping {
            Grouping::PerJob => (0..n).map(|i| vec![i]).collect(),
            Grouping::PerBatch => vec![(0..n).collect()],
            Grouping::Duplicated => (0..n).chain(0..n).map(|i| vec![i]).collect(),
        }
    }

    fn run_group(&self, batch: &JobBatch, group: &[usize]) -> anyhow::Result<GroupStatus> {
        let x = batch.params.get("x").copied().unwrap_or(1.0);
        let mut completed = Vec::new();
        let mut outputs = Outputs::new();
        for &i in group {
            let job = &batch.jobs[i];
            if self.failing.contains(&job.name) {
                bail!("simulation of `{}` did not converge", job.name);
            }
            if self.panicking.contains(&job.name) {
                panic!("simulator crashed while running `{}`", job.name);
            }
            self.runs.lock().unwrap().push(job.name.clone());
            if self.unreadable.contains(&job.name) {
                continue;
            }
            let k = job.params.get("k").copied().unwrap_or(1.0);
            let gain = k * x;
            outputs.insert(
                i,
                Arc::new(AmpResult {
                    gain,
                    bw: 1000.0 / gain,
                }),
            );
            completed.push(i);
        }
        Ok(GroupStatus::new(completed, outputs))
    }

    fn read_result(
        &self,
        _batch: &JobBatch,
        job: usize,
        status: &GroupStatus,
    ) -> Option<Arc<dyn SimResult>> {
        let result: Arc<dyn SimResult> = status.payload::<Outputs>()?.get(&job)?.clone();
        Some(result)
    }

    fn cleanup(&self, _batch: &JobBatch) {
        *self.cleanups.lock().unwrap() += 1;
    }
}
