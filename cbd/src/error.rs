//! Error types and error handling utilities.

use std::sync::Arc;

use arcstr::ArcStr;

use crate::validation::Issues;

/// A result type returning corner-based design errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type for corner-based design functions.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The problem definition is inconsistent.
    #[error("invalid problem definition:\n{0}")]
    Compile(Issues),
    /// A measure expression failed to compile.
    #[error("invalid expression for measure `{measure}`: {message}")]
    Expression {
        /// The measure whose expression is invalid.
        measure: ArcStr,
        /// A description of the problem.
        message: String,
    },
    /// A design parameter has the same name as a fixed parameter.
    #[error("parameter `{name}` is both a design parameter and a fixed parameter")]
    ParamCollision {
        /// The colliding parameter name.
        name: ArcStr,
    },
    /// A corner dimension has an alias list whose length does not match its value list.
    #[error("dimension `{name}` has {values} value(s) but {aliases} alias(es)")]
    AliasMismatch {
        /// The dimension name.
        name: ArcStr,
        /// The number of values.
        values: usize,
        /// The number of aliases.
        aliases: usize,
    },
    /// A design option has an unusable value.
    #[error("invalid design option `{name}`: {message}")]
    InvalidOption {
        /// The option name.
        name: ArcStr,
        /// A description of the problem.
        message: String,
    },
    /// A simulator partitioned its jobs incorrectly.
    #[error("simulator `{simulator}` returned an invalid job grouping: {message}")]
    InvalidGrouping {
        /// The simulator id.
        simulator: ArcStr,
        /// A description of the problem.
        message: String,
    },
    /// A worker task panicked.
    #[error("a worker task panicked")]
    Panic,
    /// An I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] Arc<std::io::Error>),
    /// A problem definition could not be parsed.
    #[error("failed to parse problem definition: {0}")]
    Parse(String),
    /// An [`anyhow::Error`] for external use.
    #[error(transparent)]
    Anyhow(#[from] Arc<anyhow::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Anyhow(Arc::new(value))
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value.to_string())
    }
}
