//! The measure evaluator capability.

use std::sync::Arc;

use arcstr::ArcStr;
use mexpr::{Environment, EvalError, Program, Value};

/// A measure source compiled by a [`MeasureEvaluator`].
pub trait CompiledMeasure: Send + Sync {
    /// Evaluates the measure in `env`.
    fn evaluate(&self, env: &Environment) -> Result<Value, EvalError>;

    /// The source the measure was compiled from.
    fn source(&self) -> &str;
}

/// Compiles measure sources.
pub trait MeasureEvaluator: Send + Sync {
    /// Compiles `source`, returning a description of the problem on failure.
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledMeasure>, String>;
}

/// Evaluates measures written in the `mexpr` language.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl MeasureEvaluator for ExprEvaluator {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledMeasure>, String> {
        match mexpr::compile(source) {
            Ok(program) => Ok(Arc::new(program)),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl CompiledMeasure for Program {
    fn evaluate(&self, env: &Environment) -> Result<Value, EvalError> {
        self.eval(env)
    }

    fn source(&self) -> &str {
        Program::source(self)
    }
}

/// Converts a component-naming value into a list of names.
pub(crate) fn component_names(value: Value) -> Result<Vec<ArcStr>, String> {
    match value {
        Value::Str(s) => Ok(vec![s]),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s),
                other => Err(format!(
                    "expected a list of strings, found an element of type {}",
                    other.type_name()
                )),
            })
            .collect(),
        other => Err(format!(
            "expected a list of strings, found {}",
            other.type_name()
        )),
    }
}
