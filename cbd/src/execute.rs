//! Task execution.
//!
//! Tasks are submitted to an [`Executor`] and produce [`TaskHandle`]s:
//! write-once cells that are filled when the task finishes. Panicking tasks
//! fill their handle with [`Error::Panic`] instead of taking a worker down.

use std::fmt::Formatter;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arcstr::ArcStr;
use crossbeam_channel::{unbounded, Sender};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// A unit of work that can run on any worker.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs units of work.
pub trait Executor: Send + Sync {
    /// Runs `work`, possibly on another thread.
    fn spawn(&self, work: Work);
}

/// Runs every unit of work inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn spawn(&self, work: Work) {
        work();
    }
}

/// A fixed pool of worker threads fed by a shared queue.
///
/// Dropping the pool waits for queued work to finish.
pub struct ThreadPool {
    sender: Option<Sender<Work>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `workers` threads.
    ///
    /// Zero workers means one per available CPU.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            workers
        };
        let (sender, receiver) = unbounded::<Work>();
        let workers = (0..workers)
            .map(|_| {
                let receiver = receiver.clone();
                thread::spawn(move || {
                    while let Ok(work) = receiver.recv() {
                        work();
                    }
                })
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// The number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for ThreadPool {
    fn spawn(&self, work: Work) {
        if let Some(sender) = &self.sender {
            if let Err(err) = sender.send(work) {
                // Every worker has exited; run the work here instead.
                (err.into_inner())();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// A keyed unit of work producing a value.
pub struct Task<T> {
    key: ArcStr,
    work: Box<dyn FnOnce() -> T + Send + 'static>,
}

impl<T> Task<T> {
    /// Creates a task.
    pub fn new(key: impl Into<ArcStr>, work: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            key: key.into(),
            work: Box::new(work),
        }
    }

    /// The task key.
    pub fn key(&self) -> &ArcStr {
        &self.key
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("key", &self.key).finish()
    }
}

/// A handle to the result of a submitted task.
pub struct TaskHandle<T> {
    key: ArcStr,
    cell: Arc<OnceCell<Result<T>>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("done", &self.cell.get().is_some())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// The key of the task this handle belongs to.
    pub fn key(&self) -> &ArcStr {
        &self.key
    }

    /// Blocks until the task finishes, returning its output.
    ///
    /// Returns [`Error::Panic`] if the task panicked.
    pub fn wait(&self) -> Result<&T> {
        self.cell.wait().as_ref().map_err(Clone::clone)
    }
}

/// Submits `tasks` to `executor`.
pub fn submit<T: Send + Sync + 'static>(
    executor: &dyn Executor,
    tasks: Vec<Task<T>>,
) -> Vec<TaskHandle<T>> {
    tasks
        .into_iter()
        .map(|task| {
            let cell = Arc::new(OnceCell::new());
            let handle = TaskHandle {
                key: task.key.clone(),
                cell: cell.clone(),
            };
            let Task { key, work } = task;
            executor.spawn(Box::new(move || {
                let result = catch_unwind(AssertUnwindSafe(work)).map_err(|_| {
                    tracing::error!(task = %key, "task panicked");
                    Error::Panic
                });
                if cell.set(result).is_err() {
                    tracing::error!(task = %key, "task handle was already set");
                }
            }));
            handle
        })
        .collect()
}

/// Blocks until every task finishes, returning the outputs in submission order.
pub fn join_all<T>(handles: &[TaskHandle<T>]) -> Vec<Result<&T>> {
    handles.iter().map(TaskHandle::wait).collect()
}
