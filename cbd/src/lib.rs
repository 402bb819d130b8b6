//! Corner-based circuit design.
//!
//! Finds design parameters that satisfy performance requirements across a
//! set of operating and process corners. The design loop evaluates every
//! corner, keeps only the corners that matter for each measure, and
//! re-optimizes until a full evaluation adds no new corner:
//!
//! - [`corner`] generates corners as cartesian products of model and
//!   parameter choices.
//! - [`compile`] maps measures to the (corner, analysis) jobs that must run.
//! - [`dispatch`] runs jobs on [`simulator`] backends and evaluates measures.
//! - [`aggregate`] reduces per-corner measure values into a scalar cost.
//! - [`design`] drives the passes.
#![warn(missing_docs)]

pub mod aggregate;
pub mod compile;
pub mod context;
pub mod corner;
pub mod design;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod execute;
pub mod merge;
pub mod optimizer;
pub mod problem;
pub mod report;
pub mod simulator;
pub mod sink;
pub mod validation;

#[cfg(test)]
pub(crate) mod tests;

pub use design::{DesignLoop, Outcome};
pub use error::{Error, Result};
pub use problem::Problem;
