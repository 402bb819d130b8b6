//! A small expression and script language for computing circuit performance measures.
//!
//! Measure sources are either a single expression,
//!
//! ```
//! use mexpr::{compile, Environment, Value};
//!
//! let program = compile("2 * abs(gain) - 3").unwrap();
//! let env = Environment::new().with_var("gain", -20.0);
//! assert_eq!(program.eval(&env).unwrap(), Value::Real(37.0));
//! ```
//!
//! or a script whose value is whatever it assigns to [`RESULT_VAR`]:
//!
//! ```
//! use mexpr::{compile, Environment, Value};
//!
//! let program = compile("lo = min(v)\nhi = max(v)\n__result = hi - lo").unwrap();
//! let env = Environment::new().with_var("v", vec![0.5, 2.0, 1.0]);
//! assert_eq!(program.eval(&env).unwrap(), Value::Real(1.5));
//! ```
#![warn(missing_docs)]

use arcstr::ArcStr;

pub mod error;
pub mod lexer;
pub mod parser;
pub mod value;

mod builtins;
mod eval;

pub use error::{CompileError, EvalError, ParseError};
pub use num::complex::Complex64;
pub use value::{Environment, Function, Value};

use eval::Scope;
use lexer::Tokenizer;
use parser::{Expr, Stmt};

/// The variable a script assigns its result to.
pub const RESULT_VAR: &str = "__result";

/// A compiled measure source.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    source: ArcStr,
    body: Body,
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Expr(Expr),
    Script(Vec<Stmt>),
}

/// Compiles a measure source.
///
/// The source is parsed as a single expression first, and as a script if
/// that fails.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let source = ArcStr::from(source);
    let len = source.len();
    let tokens = Tokenizer::new(&source).tokenize();

    let expression = match tokens.clone().and_then(|t| parser::parse_expression(t, len)) {
        Ok(expr) => {
            return Ok(Program {
                source,
                body: Body::Expr(expr),
            })
        }
        Err(e) => e,
    };
    let stmts = tokens
        .and_then(|t| parser::parse_script(t, len))
        .map_err(|script| CompileError::Syntax { expression, script })?;
    let assigns_result = stmts
        .iter()
        .any(|stmt| matches!(stmt, Stmt::Assign(name, _) if name == RESULT_VAR));
    if !assigns_result {
        return Err(CompileError::NoResult(RESULT_VAR));
    }
    Ok(Program {
        source,
        body: Body::Script(stmts),
    })
}

impl Program {
    /// The source this program was compiled from.
    pub fn source(&self) -> &ArcStr {
        &self.source
    }

    /// Returns `true` if the source was compiled as a script.
    pub fn is_script(&self) -> bool {
        matches!(self.body, Body::Script(_))
    }

    /// Evaluates the program in the given environment.
    pub fn eval(&self, env: &Environment) -> Result<Value, EvalError> {
        let mut scope = Scope::new(env);
        match &self.body {
            Body::Expr(expr) => scope.eval(expr),
            Body::Script(stmts) => {
                scope.run(stmts)?;
                scope.take_local(RESULT_VAR).ok_or(EvalError::NoResult)
            }
        }
    }
}
