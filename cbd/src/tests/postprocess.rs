use mexpr::{Complex64, Value};
use test_log::test;

use crate::dispatch::{postprocess, MeasureValue};

#[test]
fn scalars_pass_through() {
    assert_eq!(postprocess(Value::Real(2.5), false), Some(MeasureValue::Scalar(2.5)));
}

#[test]
fn single_element_arrays_are_scalarized() {
    assert_eq!(postprocess(Value::Array(vec![3.0]), false), Some(MeasureValue::Scalar(3.0)));
    assert_eq!(postprocess(Value::Array(vec![3.0]), true), Some(MeasureValue::Scalar(3.0)));
}

#[test]
fn scalar_measures_reject_longer_arrays() {
    assert_eq!(postprocess(Value::Array(vec![1.0, 2.0]), false), None);
    assert_eq!(
        postprocess(Value::Array(vec![1.0, 2.0]), true),
        Some(MeasureValue::Vector(vec![1.0, 2.0]))
    );
}

#[test]
fn unsupported_values_are_rejected() {
    assert_eq!(postprocess(Value::Array(Vec::new()), true), None);
    assert_eq!(
        postprocess(Value::Complex(vec![Complex64::new(1.0, 1.0), Complex64::new(0.0, 1.0)]), true),
        None
    );
    assert_eq!(postprocess(Value::Str("ok".into()), false), None);
    assert_eq!(
        postprocess(Value::List(vec![Value::Real(1.0), Value::Str("x".into())]), true),
        None
    );
}

#[test]
fn non_finite_values_are_rejected() {
    assert_eq!(postprocess(Value::Real(f64::NAN), false), None);
    assert_eq!(postprocess(Value::Real(f64::INFINITY), false), None);
    assert_eq!(postprocess(Value::Array(vec![1.0, f64::NAN]), true), None);
}
