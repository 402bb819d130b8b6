//! Utilities for loading and merging design loop configuration files.
#![warn(missing_docs)]
pub mod config;
pub mod home;
pub mod paths;
mod raw;

pub use config::{Config, DesignConfig, ExecutorConfig};
