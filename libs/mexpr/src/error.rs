//! Measure language errors.

use arcstr::ArcStr;
use thiserror::Error;

/// A syntax error at a byte offset in the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct ParseError {
    /// The byte offset at which the error was detected.
    pub offset: usize,
    /// A description of the problem.
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// An error produced while compiling a measure source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The source is neither a valid expression nor a valid script.
    #[error("not a valid expression ({expression}) nor a valid script ({script})")]
    Syntax {
        /// Why the source failed to parse as an expression.
        expression: ParseError,
        /// Why the source failed to parse as a script.
        script: ParseError,
    },
    /// The source is a script, but never assigns the result variable.
    #[error("script never assigns `{0}`")]
    NoResult(&'static str),
}

/// An error raised while evaluating a compiled measure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A variable was referenced but not defined.
    #[error("undefined variable `{0}`")]
    UndefinedVariable(ArcStr),
    /// A function was called but not defined.
    #[error("undefined function `{0}`")]
    UndefinedFunction(ArcStr),
    /// An operand had the wrong type for an operation.
    #[error("type error: {0}")]
    Type(String),
    /// Two arrays of different lengths were combined element-wise.
    #[error("length mismatch: {0} vs {1}")]
    LengthMismatch(usize, usize),
    /// An index was out of bounds or a record key was missing.
    #[error("no element at index {0}")]
    Index(String),
    /// A function received the wrong number of arguments.
    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        /// The function name.
        name: ArcStr,
        /// A description of the accepted argument count.
        expected: &'static str,
        /// The number of arguments received.
        got: usize,
    },
    /// A script finished without producing a result.
    #[error("script did not assign a result")]
    NoResult,
    /// A host-provided function reported a failure.
    #[error("{0}")]
    Host(String),
}
