//! Results sinks.

use std::sync::Mutex;
use std::time::Duration;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::context::AnalysisCount;
use crate::dispatch::MeasureResults;
use crate::problem::ParamMap;

/// Identifies a committed record.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(usize);

/// A summary of one design pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    /// The pass number, starting at 1.
    pub pass: usize,
    /// The parameters at the end of the pass.
    pub params: ParamMap,
    /// The cost of the full evaluation at the end of the pass.
    pub cost: f64,
    /// The active corners of each measure during the pass.
    pub corners: IndexMap<ArcStr, Vec<ArcStr>>,
}

/// A snapshot of one optimizer iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// The iteration number, starting at 1.
    pub iter: usize,
    /// The evaluated parameters.
    pub params: ParamMap,
    /// The cost.
    pub cost: f64,
    /// The aggregate diagnostics.
    pub aggregate: Aggregate,
    /// The measure values.
    pub results: MeasureResults,
}

/// The final summary of a design run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclusionRecord {
    /// The number of passes.
    pub passes: usize,
    /// The final parameters.
    pub params: ParamMap,
    /// The final cost.
    pub cost: f64,
    /// Simulator invocations over the whole run.
    pub counts: AnalysisCount,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// A record committed to a [`ResultsSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// A pass summary.
    Pass(PassRecord),
    /// An optimizer iteration.
    Iteration(IterationRecord),
    /// The run conclusion.
    Conclusion(ConclusionRecord),
}

/// The type of a [`Record`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// [`Record::Pass`].
    Pass,
    /// [`Record::Iteration`].
    Iteration,
    /// [`Record::Conclusion`].
    Conclusion,
}

impl Record {
    /// The type of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Pass(_) => RecordKind::Pass,
            Self::Iteration(_) => RecordKind::Iteration,
            Self::Conclusion(_) => RecordKind::Conclusion,
        }
    }
}

/// Stores records in a parent/child hierarchy.
pub trait ResultsSink: Send + Sync {
    /// Commits `record` under `parent`, or at the root.
    fn commit(&self, parent: Option<RecordId>, record: Record) -> RecordId;

    /// Looks up a committed record.
    fn record(&self, id: RecordId) -> Option<Record>;

    /// The closest ancestor of `id` (including `id` itself) of the given kind.
    fn ancestor(&self, id: RecordId, kind: RecordKind) -> Option<RecordId>;
}

/// A sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Option<RecordId>, Record)>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed record with its parent, in commit order.
    pub fn records(&self) -> Vec<(Option<RecordId>, Record)> {
        self.lock().clone()
    }

    /// The records committed directly under `parent`.
    pub fn children(&self, parent: Option<RecordId>) -> Vec<(RecordId, Record)> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, (p, _))| *p == parent)
            .map(|(i, (_, r))| (RecordId(i), r.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Option<RecordId>, Record)>> {
        // A poisoned sink still holds every record committed before the panic.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultsSink for MemorySink {
    fn commit(&self, parent: Option<RecordId>, record: Record) -> RecordId {
        let mut records = self.lock();
        records.push((parent, record));
        RecordId(records.len() - 1)
    }

    fn record(&self, id: RecordId) -> Option<Record> {
        self.lock().get(id.0).map(|(_, r)| r.clone())
    }

    fn ancestor(&self, id: RecordId, kind: RecordKind) -> Option<RecordId> {
        let records = self.lock();
        let mut current = Some(id);
        while let Some(id) = current {
            let (parent, record) = records.get(id.0)?;
            if record.kind() == kind {
                return Some(id);
            }
            current = *parent;
        }
        None
    }
}
