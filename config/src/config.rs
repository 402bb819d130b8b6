//! Typed user settings.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::raw::RawConfig;

/// Settings read from `.cbd/config.toml` files and `CBD_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Evaluation scheduling.
    pub executor: ExecutorConfig,
    /// Design loop fallbacks.
    pub design: DesignConfig,
}

/// The `[executor]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads used to run simulator groups. `0` uses one per core.
    pub workers: usize,
}

/// The `[design]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Cost contributed by a measure that failed to evaluate.
    pub failure_penalty: f64,
    /// Cost evaluations allowed per optimization run.
    pub max_iter: usize,
    /// Normalized step size at which optimization stops.
    pub step_tol: f64,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            failure_penalty: 10000.0,
            max_iter: 200,
            step_tol: 1e-3,
        }
    }
}

impl Config {
    /// Loads the configuration of the current process.
    pub fn load() -> Result<Self> {
        Self::from_raw(&RawConfig::default()?)
    }

    /// Loads the configuration seen from `cwd`, with `home` as the configuration home.
    pub fn new(cwd: PathBuf, home: PathBuf) -> Result<Self> {
        Self::from_raw(&RawConfig::new(cwd, home))
    }

    pub(crate) fn from_raw(raw: &RawConfig) -> Result<Self> {
        let defaults = Config::default();
        let cfg = Config {
            executor: ExecutorConfig {
                workers: raw
                    .get("executor.workers")?
                    .unwrap_or(defaults.executor.workers),
            },
            design: DesignConfig {
                failure_penalty: raw
                    .get("design.failure_penalty")?
                    .unwrap_or(defaults.design.failure_penalty),
                max_iter: raw
                    .get("design.max_iter")?
                    .unwrap_or(defaults.design.max_iter),
                step_tol: raw
                    .get("design.step_tol")?
                    .unwrap_or(defaults.design.step_tol),
            },
        };

        if !cfg.design.failure_penalty.is_finite() || cfg.design.failure_penalty < 0.0 {
            bail!(
                "`design.failure_penalty` must be a finite non-negative number, found {}",
                cfg.design.failure_penalty
            );
        }
        if cfg.design.step_tol <= 0.0 {
            bail!(
                "`design.step_tol` must be positive, found {}",
                cfg.design.step_tol
            );
        }
        if cfg.design.max_iter == 0 {
            bail!("`design.max_iter` must be at least 1");
        }
        log::debug!("loaded configuration {:?}", cfg);
        Ok(cfg)
    }
}
