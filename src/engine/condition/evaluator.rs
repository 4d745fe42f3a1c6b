// SPDX-License-Identifier: MIT

//! Interpreter for gating expressions
//!
//! Field paths resolve against the step data; paths prefixed with
//! `context.` resolve against the execution context instead. Missing fields
//! compare equal to `null` and fail every other comparison.

use super::ast::{CompareOp, Expression, Literal};
use serde_json::Value;

/// Evaluate an expression against step data and execution context
pub fn evaluate(expr: &Expression, data: &Value, context: &Value) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Compare { left, op, right } => {
            let value = resolve_path(left, data, context);
            compare(value, *op, right)
        }
        Expression::And(left, right) => {
            evaluate(left, data, context) && evaluate(right, data, context)
        }
        Expression::Or(left, right) => {
            evaluate(left, data, context) || evaluate(right, data, context)
        }
        Expression::Not(inner) => !evaluate(inner, data, context),
    }
}

fn resolve_path<'a>(path: &str, data: &'a Value, context: &'a Value) -> Option<&'a Value> {
    let (root, path) = match path.strip_prefix("context.") {
        Some(rest) => (context, rest),
        None => (data, path),
    };

    let mut current = root;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => !values_equal(left, right),
        CompareOp::Gt => compare_numbers(left, right, |a, b| a > b),
        CompareOp::Gte => compare_numbers(left, right, |a, b| a >= b),
        CompareOp::Lt => compare_numbers(left, right, |a, b| a < b),
        CompareOp::Lte => compare_numbers(left, right, |a, b| a <= b),
        CompareOp::Contains => check_contains(left, right),
    }
}

fn values_equal(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (None, Literal::Null) => true,
        (None, _) => false,
        (Some(Value::Null), Literal::Null) => true,
        (Some(Value::String(s)), Literal::String(rs)) => s == rs,
        (Some(Value::Number(n)), Literal::Number(rn)) => n
            .as_f64()
            .map(|f| (f - rn).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Some(Value::Bool(b)), Literal::Boolean(rb)) => b == rb,
        _ => false,
    }
}

fn compare_numbers<F>(left: Option<&Value>, right: &Literal, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (left, right) {
        (Some(Value::Number(n)), Literal::Number(rn)) => {
            n.as_f64().map(|f| cmp(f, *rn)).unwrap_or(false)
        }
        _ => false,
    }
}

fn check_contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(substr)) => s.contains(substr),
        (Some(Value::Array(arr)), Literal::String(val)) => {
            arr.iter().any(|v| v.as_str() == Some(val.as_str()))
        }
        (Some(Value::Array(arr)), Literal::Number(val)) => arr.iter().any(|v| {
            v.as_f64()
                .map(|f| (f - val).abs() < f64::EPSILON)
                .unwrap_or(false)
        }),
        (Some(Value::Array(arr)), Literal::Boolean(val)) => {
            arr.iter().any(|v| v.as_bool() == Some(*val))
        }
        _ => false,
    }
}
