// SPDX-License-Identifier: MIT

//! Restricted condition-expression language for step gating
//!
//! Replaces free-form expression evaluation with a small closed grammar:
//! comparisons, `and`/`or`/`not`, parentheses, dot-path field access into the
//! step data (or `context.`-prefixed access into the execution context) and
//! literals. The interpreter has no ability to call functions, touch the
//! filesystem or reach the network.

mod ast;
mod evaluator;
pub(crate) mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;

use crate::engine::error::EngineError;
use serde_json::Value;

/// Parse and evaluate an expression in one call.
pub fn evaluate_str(expression: &str, data: &Value, context: &Value) -> Result<bool, EngineError> {
    let expr = parse(expression)?;
    Ok(evaluate(&expr, data, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluate_str() {
        let result = evaluate_str("count >= 2", &json!({"count": 3}), &Value::Null).unwrap();
        assert!(result);
    }

    #[test]
    fn test_evaluate_str_parse_error() {
        let err = evaluate_str("not a condition", &json!({}), &Value::Null).unwrap_err();
        assert!(matches!(err, EngineError::Eval(_)));
    }
}
