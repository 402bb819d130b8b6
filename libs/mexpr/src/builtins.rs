//! Builtin functions.

use arcstr::ArcStr;
use num::complex::Complex64;

use crate::error::EvalError;
use crate::eval::broadcast;
use crate::value::Value;

/// Calls the builtin named `name`, or returns [`None`] if there is no such builtin.
pub(crate) fn call(name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    let result = match name {
        "abs" => unary(name, args, f64::abs, |c| Value::Array(c.iter().map(|c| c.norm()).collect())),
        "real" => unary(name, args, |x| x, |c| Value::Array(c.iter().map(|c| c.re).collect())),
        "imag" => unary(name, args, |_| 0.0, |c| Value::Array(c.iter().map(|c| c.im).collect())),
        "phase" => unary(
            name,
            args,
            |x| if x < 0.0 { std::f64::consts::PI } else { 0.0 },
            |c| Value::Array(c.iter().map(|c| c.arg()).collect()),
        ),
        "db" => unary(
            name,
            args,
            |x| 20.0 * x.abs().log10(),
            |c| Value::Array(c.iter().map(|c| 20.0 * c.norm().log10()).collect()),
        ),
        "sqrt" => real_only(name, args, f64::sqrt),
        "exp" => real_only(name, args, f64::exp),
        "ln" => real_only(name, args, f64::ln),
        "log10" => real_only(name, args, f64::log10),
        "min" => extremum(name, args, f64::min),
        "max" => extremum(name, args, f64::max),
        "sum" => reduce(name, args, |v| v.iter().sum()),
        "mean" => reduce(name, args, |v| v.iter().sum::<f64>() / v.len() as f64),
        "len" => len(name, args),
        "interp" => interp(name, args),
        "cross" => cross(name, args),
        _ => return None,
    };
    Some(result)
}

fn arity(name: &str, args: &[Value], n: usize, expected: &'static str) -> Result<(), EvalError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(EvalError::Arity {
            name: ArcStr::from(name),
            expected,
            got: args.len(),
        })
    }
}

fn reals<'a>(name: &str, value: &'a Value) -> Result<std::borrow::Cow<'a, [f64]>, EvalError> {
    match value {
        Value::Real(x) => Ok(std::borrow::Cow::Owned(vec![*x])),
        Value::Array(v) => Ok(std::borrow::Cow::Borrowed(v.as_slice())),
        other => Err(EvalError::Type(format!(
            "`{name}` expects a real argument, got {}",
            other.type_name()
        ))),
    }
}

fn unary(
    name: &str,
    args: &[Value],
    real: impl Fn(f64) -> f64,
    complex: impl Fn(&[Complex64]) -> Value,
) -> Result<Value, EvalError> {
    arity(name, args, 1, "1")?;
    match &args[0] {
        Value::Real(x) => Ok(Value::Real(real(*x))),
        Value::Array(v) => Ok(Value::Array(v.iter().map(|&x| real(x)).collect())),
        Value::Complex(c) => Ok(complex(c)),
        other => Err(EvalError::Type(format!(
            "`{name}` expects a numeric argument, got {}",
            other.type_name()
        ))),
    }
}

fn real_only(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, EvalError> {
    arity(name, args, 1, "1")?;
    match &args[0] {
        Value::Real(x) => Ok(Value::Real(f(*x))),
        other => Ok(Value::Array(reals(name, other)?.iter().map(|&x| f(x)).collect())),
    }
}

/// With one argument, reduces an array; with two, combines element-wise.
fn extremum(name: &str, args: &[Value], f: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    match args {
        [single] => {
            let v = reals(name, single)?;
            v.iter()
                .copied()
                .reduce(f)
                .map(Value::Real)
                .ok_or_else(|| EvalError::Type(format!("`{name}` of an empty array")))
        }
        [a, b] => {
            let out = broadcast(&reals(name, a)?, &reals(name, b)?, f)?;
            Ok(match (a, b) {
                (Value::Real(_), Value::Real(_)) => Value::Real(out[0]),
                _ => Value::Array(out),
            })
        }
        _ => Err(EvalError::Arity {
            name: ArcStr::from(name),
            expected: "1 or 2",
            got: args.len(),
        }),
    }
}

fn reduce(name: &str, args: &[Value], f: fn(&[f64]) -> f64) -> Result<Value, EvalError> {
    arity(name, args, 1, "1")?;
    let v = reals(name, &args[0])?;
    if v.is_empty() {
        return Err(EvalError::Type(format!("`{name}` of an empty array")));
    }
    Ok(Value::Real(f(&v)))
}

fn len(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    arity(name, args, 1, "1")?;
    let n = match &args[0] {
        Value::Real(_) => 1,
        Value::Array(v) => v.len(),
        Value::Complex(v) => v.len(),
        Value::Str(s) => s.chars().count(),
        Value::List(v) => v.len(),
        Value::Record(m) => m.len(),
    };
    Ok(Value::Real(n as f64))
}

/// `interp(xs, ys, x)`: linear interpolation of the table `(xs, ys)` at `x`.
///
/// `xs` must be monotonically increasing. Points outside the table are clamped.
fn interp(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    arity(name, args, 3, "3")?;
    let xs = reals(name, &args[0])?;
    let ys = reals(name, &args[1])?;
    if xs.len() != ys.len() {
        return Err(EvalError::LengthMismatch(xs.len(), ys.len()));
    }
    if xs.is_empty() {
        return Err(EvalError::Type(format!("`{name}` of an empty table")));
    }
    let at = |x: f64| -> f64 {
        let i = xs.partition_point(|&v| v < x);
        if i == 0 {
            ys[0]
        } else if i == xs.len() {
            ys[xs.len() - 1]
        } else {
            let (x0, x1, y0, y1) = (xs[i - 1], xs[i], ys[i - 1], ys[i]);
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        }
    };
    match &args[2] {
        Value::Real(x) => Ok(Value::Real(at(*x))),
        other => Ok(Value::Array(reals(name, other)?.iter().map(|&x| at(x)).collect())),
    }
}

/// `cross(xs, ys, level)`: the first `x` at which `ys` crosses `level`.
fn cross(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    arity(name, args, 3, "3")?;
    let xs = reals(name, &args[0])?;
    let ys = reals(name, &args[1])?;
    let Some(level) = args[2].as_real() else {
        return Err(EvalError::Type(format!("`{name}` expects a real level")));
    };
    if xs.len() != ys.len() {
        return Err(EvalError::LengthMismatch(xs.len(), ys.len()));
    }
    for i in 1..xs.len() {
        let (y0, y1) = (ys[i - 1] - level, ys[i] - level);
        if y0 == 0.0 {
            return Ok(Value::Real(xs[i - 1]));
        }
        if y0.signum() != y1.signum() {
            let t = y0 / (y0 - y1);
            return Ok(Value::Real(xs[i - 1] + t * (xs[i] - xs[i - 1])));
        }
    }
    Err(EvalError::Host(format!("`{name}`: no crossing of level {level}")))
}
