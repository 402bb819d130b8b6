//! Key type for querying configuration values.

use std::fmt;

/// Key for a configuration variable.
///
/// Tracks both the dotted TOML path and the environment variable that
/// overrides it. Pushing `design` then `max-iter` yields the TOML key
/// `design.max-iter` and the variable `CBD_DESIGN_MAX_ITER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigKey {
    env: String,
    parts: Vec<String>,
}

impl ConfigKey {
    /// Creates a key for the root table.
    pub(crate) fn new() -> ConfigKey {
        ConfigKey {
            env: "CBD".to_string(),
            parts: Vec::new(),
        }
    }

    /// Creates a [`ConfigKey`] from a period-separated TOML key.
    pub(crate) fn from_dotted(key: &str) -> ConfigKey {
        let mut cfg = ConfigKey::new();
        for part in key.split('.').filter(|p| !p.is_empty()) {
            cfg.push(part);
        }
        cfg
    }

    /// Pushes a sub-key, the equivalent of indexing a TOML sub-table.
    pub(crate) fn push(&mut self, name: &str) {
        self.env.push('_');
        self.env.push_str(&name.replace('-', "_").to_uppercase());
        self.parts.push(name.to_string());
    }

    /// The environment variable overriding this key.
    pub(crate) fn as_env_key(&self) -> &str {
        &self.env
    }

    /// The key parts, outermost first.
    pub(crate) fn parts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(String::as_str)
    }

    /// Returns whether this is the key of the root table.
    pub(crate) fn is_root(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.parts.join(".").fmt(f)
    }
}
