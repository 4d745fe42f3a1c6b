// SPDX-License-Identifier: MIT

//! Abstract syntax tree for the restricted gating-expression language
//!
//! The language deliberately has no function calls, no assignment and no
//! ambient capabilities: comparisons, boolean connectives, field paths and
//! literals only.

/// A gating expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Comparison: field path `op` literal
    Compare {
        /// Dot path into the step data, or `context.`-prefixed path
        left: String,
        op: CompareOp,
        right: Literal,
    },
    /// Logical AND
    And(Box<Expression>, Box<Expression>),
    /// Logical OR
    Or(Box<Expression>, Box<Expression>),
    /// Logical NOT
    Not(Box<Expression>),
    /// Literal true
    True,
    /// Literal false
    False,
}

impl Expression {
    /// All field paths the expression reads, in source order
    pub fn referenced_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Compare { left, .. } => out.push(left),
            Expression::And(left, right) | Expression::Or(left, right) => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Expression::Not(inner) => inner.collect_paths(out),
            Expression::True | Expression::False => {}
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// substring match for strings, membership for arrays
    Contains,
}

/// Literal values on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}
