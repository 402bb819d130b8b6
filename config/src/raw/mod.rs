//! Raw access to configuration files.
//!
//! [`RawConfig`] discovers `.cbd/config.toml` files in the working directory
//! and its ancestors, followed by `config.toml` in the configuration home.
//! Files closer to the working directory take priority. Tables are merged
//! key by key; any other value is taken from the highest priority file
//! that defines it.
//!
//! Every leaf value can be overridden by an environment variable named
//! after its key: `design.max_iter` is overridden by `CBD_DESIGN_MAX_ITER`.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use lazycell::LazyCell;
use serde::de::DeserializeOwned;

use crate::{home, paths};

pub(crate) use key::ConfigKey;

mod key;

/// Configuration files and environment overrides.
#[derive(Debug)]
pub(crate) struct RawConfig {
    /// The configuration home, holding the user-wide `config.toml`.
    home_path: PathBuf,
    /// Merged file contents, loaded on first access.
    values: LazyCell<toml::Table>,
    cwd: PathBuf,
    /// Directory where config file searching should stop (inclusive).
    search_stop_path: Option<PathBuf>,
    /// Environment variable snapshot.
    env: HashMap<String, String>,
}

impl RawConfig {
    /// Creates a new [`RawConfig`] rooted at `cwd`.
    ///
    /// No files are read until a value is requested.
    pub(crate) fn new(cwd: PathBuf, homedir: PathBuf) -> RawConfig {
        RawConfig {
            home_path: homedir,
            values: LazyCell::new(),
            cwd,
            search_stop_path: None,
            env: env::vars().collect(),
        }
    }

    /// Creates a [`RawConfig`] for the current process.
    #[allow(clippy::should_implement_trait)]
    pub(crate) fn default() -> Result<RawConfig> {
        let cwd = env::current_dir()
            .with_context(|| "couldn't get the current directory of the process")?;
        let homedir = home::cbd_home_with_cwd(&cwd)
            .with_context(|| "couldn't find the cbd home directory; is $HOME set?")?;
        Ok(RawConfig::new(cwd, homedir))
    }

    /// Sets the path where ancestor config file searching will stop. The
    /// given path is included, but its ancestors are not.
    pub(crate) fn set_search_stop_path<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();
        debug_assert!(self.cwd.starts_with(&path));
        self.search_stop_path = Some(path);
    }

    /// Replaces the environment variable snapshot.
    #[cfg(test)]
    pub(crate) fn set_env(&mut self, env: HashMap<String, String>) {
        self.env = env;
    }

    fn values(&self) -> Result<&toml::Table> {
        self.values.try_borrow_with(|| self.load_values())
    }

    fn load_values(&self) -> Result<toml::Table> {
        let mut cfg = toml::Table::new();
        self.walk_tree(|path| {
            let value = load_file(path)?;
            merge(&mut cfg, value).with_context(|| {
                format!("failed to merge configuration at `{}`", path.display())
            })
        })
        .with_context(|| "could not load cbd configuration")?;
        Ok(cfg)
    }

    /// Calls `walk` on every configuration file, highest priority first.
    fn walk_tree<F>(&self, mut walk: F) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let mut stash: HashSet<PathBuf> = HashSet::new();

        for current in paths::ancestors(&self.cwd, self.search_stop_path.as_deref()) {
            let path = paths::project_config(current);
            if path.exists() {
                walk(&path)?;
                stash.insert(path);
            }
        }

        let path = self.home_path.join("config.toml");
        if path.exists() && !stash.contains(&path) {
            walk(&path)?;
        }

        Ok(())
    }

    fn get_value(&self, key: &ConfigKey) -> Result<Option<toml::Value>> {
        let values = self.values()?;
        if key.is_root() {
            return Ok(Some(toml::Value::Table(values.clone())));
        }
        let mut table = values;
        let mut parts = key.parts().peekable();
        while let Some(part) = parts.next() {
            let Some(value) = table.get(part) else {
                return Ok(None);
            };
            if parts.peek().is_none() {
                return Ok(Some(value.clone()));
            }
            table = match value {
                toml::Value::Table(t) => t,
                other => bail!(
                    "expected table for configuration key `{}`, but found {}",
                    part,
                    other.type_str()
                ),
            };
        }
        Ok(None)
    }

    fn get_env_value(&self, key: &ConfigKey) -> Option<toml::Value> {
        if key.is_root() {
            return None;
        }
        let raw = self.env.get(key.as_env_key())?;
        log::trace!("{} overridden by {}", key, key.as_env_key());
        Some(match raw.as_str() {
            "true" => toml::Value::Boolean(true),
            "false" => toml::Value::Boolean(false),
            s => {
                if let Ok(i) = s.parse::<i64>() {
                    toml::Value::Integer(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    toml::Value::Float(f)
                } else {
                    toml::Value::String(s.to_string())
                }
            }
        })
    }

    /// Retrieves a config value.
    ///
    /// ```rust,ignore
    /// let v: Option<usize> = config.get("design.max_iter")?;
    /// let v: Option<DesignConfig> = config.get("design")?;
    /// ```
    ///
    /// Environment variables override the key they name only; fetching a
    /// table does not apply overrides of its entries.
    pub(crate) fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = ConfigKey::from_dotted(key);
        log::trace!("get {}", key);
        let value = match self.get_env_value(&key) {
            Some(value) => value,
            None => match self.get_value(&key)? {
                Some(value) => value,
                None => return Ok(None),
            },
        };
        value
            .try_into::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid configuration value for `{}`: {}", key, e))
    }
}

fn load_file(path: &Path) -> Result<toml::Table> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file `{}`", path.display()))?;
    contents
        .parse::<toml::Table>()
        .map_err(|e| anyhow::Error::from(e).context("could not parse input as TOML"))
        .with_context(|| format!("could not parse TOML configuration in `{}`", path.display()))
}

/// Merges `from` into `into`, keeping values already in `into`.
fn merge(into: &mut toml::Table, from: toml::Table) -> Result<()> {
    for (key, value) in from {
        match into.get_mut(&key) {
            None => {
                into.insert(key, value);
            }
            Some(old) => match (old, value) {
                (toml::Value::Table(old), toml::Value::Table(new)) => {
                    merge(old, new).with_context(|| format!("failed to merge key `{}`", key))?;
                }
                (old, new) if old.is_table() || new.is_table() => {
                    bail!(
                        "failed to merge key `{}`: expected {}, but found {}",
                        key,
                        old.type_str(),
                        new.type_str()
                    );
                }
                _ => {}
            },
        }
    }
    Ok(())
}
