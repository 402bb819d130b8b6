//! Runtime values and evaluation environments.

use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use num::complex::Complex64;

use crate::error::EvalError;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A real scalar.
    Real(f64),
    /// A real array.
    Array(Vec<f64>),
    /// A complex array. Complex scalars are one-element arrays.
    Complex(Vec<Complex64>),
    /// A string.
    Str(ArcStr),
    /// A heterogeneous list.
    List(Vec<Value>),
    /// A string-keyed record.
    Record(IndexMap<ArcStr, Value>),
}

impl Value {
    /// A short name for the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Array(_) => "array",
            Value::Complex(_) => "complex",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    /// Returns the value as a real scalar, if it is one.
    ///
    /// One-element real arrays are treated as scalars.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Array(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a value from a list of evaluated list-literal items.
    ///
    /// All-real lists collapse into a real array; lists containing a
    /// complex number collapse into a complex array if every item is numeric.
    pub(crate) fn from_items(items: Vec<Value>) -> Value {
        if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Real(_))) {
            return Value::Array(items.iter().filter_map(Value::as_real).collect());
        }
        let numeric = items
            .iter()
            .all(|v| matches!(v, Value::Real(_)) || matches!(v, Value::Complex(c) if c.len() == 1));
        if !items.is_empty() && numeric {
            return Value::Complex(
                items
                    .iter()
                    .map(|v| match v {
                        Value::Real(x) => Complex64::new(*x, 0.0),
                        Value::Complex(c) => c[0],
                        _ => unreachable!(),
                    })
                    .collect(),
            );
        }
        Value::List(items)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(value)
    }
}

impl From<Vec<Complex64>> for Value {
    fn from(value: Vec<Complex64>) -> Self {
        Value::Complex(value)
    }
}

impl From<ArcStr> for Value {
    fn from(value: ArcStr) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(ArcStr::from(value))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{x}"),
            Value::Array(v) => write!(f, "{v:?}"),
            Value::Complex(v) => {
                write!(f, "[")?;
                for (i, c) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "]")
            }
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A host function callable from measure sources.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// The variables and functions visible to a measure while it is evaluated.
#[derive(Clone, Default)]
pub struct Environment {
    vars: HashMap<ArcStr, Value>,
    funcs: HashMap<ArcStr, Function>,
}

impl Debug for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("vars", &self.vars)
            .field("funcs", &self.funcs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Environment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) a variable.
    pub fn set_var(&mut self, name: impl Into<ArcStr>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Defines (or redefines) a variable, returning the environment.
    pub fn with_var(mut self, name: impl Into<ArcStr>, value: impl Into<Value>) -> Self {
        self.set_var(name, value);
        self
    }

    /// Defines (or redefines) a host function.
    pub fn set_fn(
        &mut self,
        name: impl Into<ArcStr>,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    ) {
        self.funcs.insert(name.into(), Arc::new(f));
    }

    /// Defines (or redefines) a host function, returning the environment.
    pub fn with_fn(
        mut self,
        name: impl Into<ArcStr>,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    ) -> Self {
        self.set_fn(name, f);
        self
    }

    /// Layers `other` on top of this environment.
    ///
    /// Names defined in `other` shadow names already present.
    pub fn extend(&mut self, other: Environment) {
        self.vars.extend(other.vars);
        self.funcs.extend(other.funcs);
    }

    /// Looks up a variable.
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Looks up a host function.
    pub fn func(&self, name: &str) -> Option<&Function> {
        self.funcs.get(name)
    }
}

impl<K: Into<ArcStr>, V: Into<Value>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut env = Environment::new();
        for (k, v) in iter {
            env.set_var(k, v);
        }
        env
    }
}
