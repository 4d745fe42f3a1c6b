// SPDX-License-Identifier: MIT

//! Parser for the restricted gating-expression language
//!
//! Accepts expressions like:
//! - `status == 'ready'`
//! - `score > 0.8 and not (kind == 'draft')`
//! - `context.user_id != null`

use super::ast::{CompareOp, Expression, Literal};
use crate::engine::error::EngineError;

/// Parse an expression string into an AST
pub fn parse(input: &str) -> Result<Expression, EngineError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(EngineError::Eval("empty condition expression".to_string()));
    }
    parse_or(input)
}

/// Lowest precedence: `a or b`
fn parse_or(input: &str) -> Result<Expression, EngineError> {
    if let Some(pos) = find_keyword(input, " or ") {
        let left = parse_or(&input[..pos])?;
        let right = parse_or(&input[pos + 4..])?;
        return Ok(Expression::Or(Box::new(left), Box::new(right)));
    }
    parse_and(input)
}

/// `a and b`
fn parse_and(input: &str) -> Result<Expression, EngineError> {
    if let Some(pos) = find_keyword(input, " and ") {
        let left = parse_and(&input[..pos])?;
        let right = parse_and(&input[pos + 5..])?;
        return Ok(Expression::And(Box::new(left), Box::new(right)));
    }
    parse_unary(input)
}

/// `not expr` or a primary
fn parse_unary(input: &str) -> Result<Expression, EngineError> {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix("not ") {
        return Ok(Expression::Not(Box::new(parse_unary(rest)?)));
    }
    parse_primary(input)
}

fn parse_primary(input: &str) -> Result<Expression, EngineError> {
    let input = input.trim();

    // Parenthesized sub-expression
    if input.starts_with('(') && input.ends_with(')') && wraps_whole_input(input) {
        return parse_or(&input[1..input.len() - 1]);
    }

    if input == "true" {
        return Ok(Expression::True);
    }
    if input == "false" {
        return Ok(Expression::False);
    }

    parse_comparison(input)
}

fn parse_comparison(input: &str) -> Result<Expression, EngineError> {
    // Longest operators first so `>=` is not read as `>`
    let operators = [
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        ("==", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        (" contains ", CompareOp::Contains),
    ];

    for (op_str, op) in operators {
        if let Some(pos) = find_keyword(input, op_str) {
            let left = input[..pos].trim();
            if left.is_empty() || !is_valid_path(left) {
                return Err(EngineError::Eval(format!(
                    "invalid field path '{}' in condition",
                    left
                )));
            }
            let right = parse_literal(input[pos + op_str.len()..].trim())?;
            return Ok(Expression::Compare {
                left: left.to_string(),
                op,
                right,
            });
        }
    }

    Err(EngineError::Eval(format!(
        "could not parse condition: {}",
        input
    )))
}

/// Find `needle` at the top level: outside quotes and parentheses.
/// A string stays open until the quote character that opened it recurs,
/// so an apostrophe inside a double-quoted literal is plain text.
fn find_keyword(input: &str, needle: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut string_delim: Option<char> = None;

    for (i, c) in input.char_indices() {
        match string_delim {
            Some(delim) => {
                if c == delim {
                    string_delim = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    string_delim = Some(c);
                } else if c == '(' {
                    depth += 1;
                } else if c == ')' {
                    depth -= 1;
                } else if depth == 0 && input[i..].starts_with(needle) {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// True when the outermost parentheses enclose the whole input,
/// i.e. `(a) or (b)` must not be treated as one group.
fn wraps_whole_input(input: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != input.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Field paths are dotted identifiers; anything else is rejected so the
/// expression surface stays closed.
fn is_valid_path(path: &str) -> bool {
    path.split('.').all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

fn parse_literal(input: &str) -> Result<Literal, EngineError> {
    if input == "null" {
        return Ok(Literal::Null);
    }
    if input == "true" {
        return Ok(Literal::Boolean(true));
    }
    if input == "false" {
        return Ok(Literal::Boolean(false));
    }

    if (input.starts_with('\'') && input.ends_with('\'') && input.len() >= 2)
        || (input.starts_with('"') && input.ends_with('"') && input.len() >= 2)
    {
        return Ok(Literal::String(input[1..input.len() - 1].to_string()));
    }

    if let Ok(n) = input.parse::<f64>() {
        return Ok(Literal::Number(n));
    }

    Err(EngineError::Eval(format!(
        "could not parse literal: {}",
        input
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_equality() {
        let expr = parse("status == 'ready'").unwrap();
        assert_eq!(
            expr,
            Expression::Compare {
                left: "status".to_string(),
                op: CompareOp::Eq,
                right: Literal::String("ready".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_numeric_operators() {
        for (src, op) in [
            ("score > 0.8", CompareOp::Gt),
            ("score >= 0.8", CompareOp::Gte),
            ("score < 0.8", CompareOp::Lt),
            ("score <= 0.8", CompareOp::Lte),
        ] {
            let expr = parse(src).unwrap();
            assert_eq!(
                expr,
                Expression::Compare {
                    left: "score".to_string(),
                    op,
                    right: Literal::Number(0.8),
                }
            );
        }
    }

    #[test]
    fn test_parse_null_and_bool_literals() {
        assert_eq!(
            parse("error != null").unwrap(),
            Expression::Compare {
                left: "error".to_string(),
                op: CompareOp::NotEq,
                right: Literal::Null,
            }
        );
        assert_eq!(
            parse("enabled == true").unwrap(),
            Expression::Compare {
                left: "enabled".to_string(),
                op: CompareOp::Eq,
                right: Literal::Boolean(true),
            }
        );
    }

    #[test]
    fn test_parse_contains() {
        assert_eq!(
            parse("tags contains 'urgent'").unwrap(),
            Expression::Compare {
                left: "tags".to_string(),
                op: CompareOp::Contains,
                right: Literal::String("urgent".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_context_path() {
        assert_eq!(
            parse("context.user_id == 'u-1'").unwrap(),
            Expression::Compare {
                left: "context.user_id".to_string(),
                op: CompareOp::Eq,
                right: Literal::String("u-1".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_and_or_precedence() {
        // or binds looser than and: a or (b and c)
        let expr = parse("a == 1 or b == 2 and c == 3").unwrap();
        match expr {
            Expression::Or(_, right) => {
                assert!(matches!(*right, Expression::And(_, _)));
            }
            other => panic!("expected Or at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not() {
        let expr = parse("not status == 'done'").unwrap();
        assert!(matches!(expr, Expression::Not(_)));
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse("(a == 1 or b == 2) and c == 3").unwrap();
        match expr {
            Expression::And(left, _) => assert!(matches!(*left, Expression::Or(_, _))),
            other => panic!("expected And at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_booleans() {
        assert_eq!(parse("true").unwrap(), Expression::True);
        assert_eq!(parse("false").unwrap(), Expression::False);
    }

    #[test]
    fn test_apostrophe_inside_double_quoted_literal() {
        // The apostrophe must not close the string and hide the top-level or
        let expr = parse("msg == \"it's fine\" or ok == true").unwrap();
        match expr {
            Expression::Or(left, _) => assert_eq!(
                *left,
                Expression::Compare {
                    left: "msg".to_string(),
                    op: CompareOp::Eq,
                    right: Literal::String("it's fine".to_string()),
                }
            ),
            other => panic!("expected Or at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("this is not valid").is_err());
        assert!(parse("").is_err());
        assert!(parse("== 'x'").is_err());
    }

    #[test]
    fn test_rejects_function_like_paths() {
        // No call syntax sneaks through as a field path
        assert!(parse("delete() == 1").is_err());
        assert!(parse("a[0] == 1").is_err());
    }
}
