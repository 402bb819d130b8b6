//! Tree-walking evaluator.

use std::collections::HashMap;

use arcstr::ArcStr;
use num::complex::Complex64;

use crate::builtins;
use crate::error::EvalError;
use crate::parser::{BinOp, Expr, Stmt};
use crate::value::{Environment, Value};

/// Evaluation scope: script locals layered over a read-only environment.
pub(crate) struct Scope<'a> {
    env: &'a Environment,
    locals: HashMap<ArcStr, Value>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(env: &'a Environment) -> Self {
        Self {
            env,
            locals: HashMap::new(),
        }
    }

    pub(crate) fn run(&mut self, stmts: &[Stmt]) -> Result<(), EvalError> {
        for stmt in stmts {
            match stmt {
                Stmt::Assign(name, expr) => {
                    let value = self.eval(expr)?;
                    self.locals.insert(name.clone(), value);
                }
                Stmt::Expr(expr) => {
                    self.eval(expr)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn take_local(&mut self, name: &str) -> Option<Value> {
        self.locals.remove(name)
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::Real(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Var(name) => self
                .locals
                .get(name)
                .or_else(|| self.env.var(name))
                .cloned()
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::from_items(items))
            }
            Expr::Neg(inner) => negate(self.eval(inner)?),
            Expr::Binary { op, lhs, rhs } => binary(*op, self.eval(lhs)?, self.eval(rhs)?),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                // Host functions shadow builtins.
                if let Some(f) = self.env.func(name) {
                    return f(&args);
                }
                builtins::call(name, &args)
                    .unwrap_or_else(|| Err(EvalError::UndefinedFunction(name.clone())))
            }
            Expr::Index { target, index } => subscript(self.eval(target)?, self.eval(index)?),
        }
    }
}

fn negate(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Real(x) => Ok(Value::Real(-x)),
        Value::Array(v) => Ok(Value::Array(v.into_iter().map(|x| -x).collect())),
        Value::Complex(v) => Ok(Value::Complex(v.into_iter().map(|x| -x).collect())),
        other => Err(EvalError::Type(format!("cannot negate a {}", other.type_name()))),
    }
}

/// Combines two slices element-wise, broadcasting single elements.
pub(crate) fn broadcast<T: Copy, U>(
    a: &[T],
    b: &[T],
    f: impl Fn(T, T) -> U,
) -> Result<Vec<U>, EvalError> {
    match (a.len(), b.len()) {
        (1, _) => Ok(b.iter().map(|&y| f(a[0], y)).collect()),
        (_, 1) => Ok(a.iter().map(|&x| f(x, b[0])).collect()),
        (n, m) if n == m => Ok(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()),
        (n, m) => Err(EvalError::LengthMismatch(n, m)),
    }
}

fn real_op(op: BinOp) -> fn(f64, f64) -> f64 {
    match op {
        BinOp::Add => |x, y| x + y,
        BinOp::Sub => |x, y| x - y,
        BinOp::Mul => |x, y| x * y,
        BinOp::Div => |x, y| x / y,
        BinOp::Pow => f64::powf,
    }
}

fn complex_op(op: BinOp) -> fn(Complex64, Complex64) -> Complex64 {
    match op {
        BinOp::Add => |x, y| x + y,
        BinOp::Sub => |x, y| x - y,
        BinOp::Mul => |x, y| x * y,
        BinOp::Div => |x, y| x / y,
        BinOp::Pow => |x, y| x.powc(y),
    }
}

fn to_complex(value: &Value) -> Option<Vec<Complex64>> {
    match value {
        Value::Real(x) => Some(vec![Complex64::new(*x, 0.0)]),
        Value::Array(v) => Some(v.iter().map(|&x| Complex64::new(x, 0.0)).collect()),
        Value::Complex(v) => Some(v.clone()),
        _ => None,
    }
}

pub(crate) fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (&lhs, &rhs) {
        (Value::Real(x), Value::Real(y)) => Ok(Value::Real(real_op(op)(*x, *y))),
        (Value::Real(x), Value::Array(v)) => {
            Ok(Value::Array(broadcast(&[*x], v, real_op(op))?))
        }
        (Value::Array(v), Value::Real(y)) => {
            Ok(Value::Array(broadcast(v, &[*y], real_op(op))?))
        }
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(broadcast(a, b, real_op(op))?)),
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            Ok(Value::Str(arcstr::format!("{a}{b}")))
        }
        _ => match (to_complex(&lhs), to_complex(&rhs)) {
            (Some(a), Some(b)) => Ok(Value::Complex(broadcast(&a, &b, complex_op(op))?)),
            _ => Err(EvalError::Type(format!(
                "unsupported operands for {:?}: {} and {}",
                op,
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn position(index: &Value, len: usize) -> Result<usize, EvalError> {
    let Some(i) = index.as_real() else {
        return Err(EvalError::Type(format!(
            "cannot index with a {}",
            index.type_name()
        )));
    };
    if i.fract() != 0.0 {
        return Err(EvalError::Index(i.to_string()));
    }
    let resolved = if i < 0.0 { len as f64 + i } else { i };
    if resolved < 0.0 || resolved >= len as f64 {
        return Err(EvalError::Index(i.to_string()));
    }
    Ok(resolved as usize)
}

fn subscript(target: Value, index: Value) -> Result<Value, EvalError> {
    match target {
        Value::Array(v) => Ok(Value::Real(v[position(&index, v.len())?])),
        Value::Complex(v) => Ok(Value::Complex(vec![v[position(&index, v.len())?]])),
        Value::List(mut items) => {
            let i = position(&index, items.len())?;
            Ok(items.swap_remove(i))
        }
        Value::Record(mut map) => {
            let Some(key) = index.as_str() else {
                return Err(EvalError::Type(format!(
                    "records are indexed by string, not {}",
                    index.type_name()
                )));
            };
            map.swap_remove(key)
                .ok_or_else(|| EvalError::Index(format!("{key:?}")))
        }
        other => Err(EvalError::Type(format!("cannot index a {}", other.type_name()))),
    }
}
