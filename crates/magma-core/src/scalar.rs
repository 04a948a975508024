//! # Scalar Expression Language
//!
//! Scalar expressions represent computations on individual rows: input
//! references, literal values, arithmetic, comparisons, boolean logic, and
//! function calls. They appear inside predicates, projections, join
//! conditions and aggregate arguments.
//!
//! The optimizer treats these expressions as opaque payloads except for the
//! introspection methods here: collecting referenced input ordinals,
//! flattening conjunctions, detecting identity (bare input-ref) expressions,
//! and rewriting input ordinals when rules permute or merge operators.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Scalar value for literal expressions.
///
/// Uses `OrderedFloat` for `f64` so that floating-point literals can take
/// part in `Eq`/`Hash` comparisons, which the memo needs for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value.
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point, wrapped in OrderedFloat for Eq/Hash support.
    Float64(OrderedFloat<f64>),
    /// UTF-8 string.
    Utf8(String),
    /// Date as days since Unix epoch (1970-01-01).
    Date(i32),
}

impl ScalarValue {
    /// Approximate storage width of this value in bytes.
    pub fn width(&self) -> f64 {
        match self {
            ScalarValue::Null => 1.0,
            ScalarValue::Bool(_) => 1.0,
            ScalarValue::Int64(_) => 8.0,
            ScalarValue::Float64(_) => 8.0,
            ScalarValue::Utf8(s) => s.len() as f64,
            ScalarValue::Date(_) => 4.0,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality comparison (`=`).
    Eq,
    /// Inequality comparison (`<>` or `!=`).
    NotEq,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    LtEq,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    GtEq,
    /// Addition (`+`).
    Add,
    /// Subtraction (`-`).
    Sub,
    /// Multiplication (`*`).
    Mul,
    /// Division (`/`).
    Div,
}

impl BinaryOp {
    /// True for ordering comparisons other than equality.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation (`NOT`).
    Not,
    /// Arithmetic negation (unary minus).
    Neg,
    /// Null check (`IS NULL`).
    IsNull,
    /// Non-null check (`IS NOT NULL`).
    IsNotNull,
}

/// Scalar expressions used in predicates, projections, join conditions, etc.
///
/// Input references are positional: `InputRef(i)` refers to the i-th field of
/// the operator's input row. Join conditions index the concatenation of the
/// left and right input rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RexExpr {
    /// Reference to an input field by ordinal.
    InputRef(usize),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<RexExpr>,
        right: Box<RexExpr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `x IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<RexExpr> },
    /// Named function call (e.g., `UPPER(name)`, `ABS(value)`).
    Call { function: String, args: Vec<RexExpr> },
    /// Conjunction (AND) of multiple predicates. Stored as a flat list to
    /// simplify predicate decomposition and merging.
    And(Vec<RexExpr>),
    /// Disjunction (OR) of multiple predicates.
    Or(Vec<RexExpr>),
}

impl RexExpr {
    /// Shorthand for an input reference.
    pub fn input(i: usize) -> RexExpr {
        RexExpr::InputRef(i)
    }

    /// Shorthand for an integer literal.
    pub fn int(v: i64) -> RexExpr {
        RexExpr::Literal(ScalarValue::Int64(v))
    }

    /// Shorthand for an equality comparison.
    pub fn eq(left: RexExpr, right: RexExpr) -> RexExpr {
        RexExpr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Build a conjunction, flattening nested ANDs and eliding the
    /// single-element case.
    pub fn and_all(exprs: Vec<RexExpr>) -> RexExpr {
        let mut flat = Vec::new();
        for e in exprs {
            match e {
                RexExpr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.into_iter().next().unwrap_or(RexExpr::And(Vec::new()))
        } else {
            RexExpr::And(flat)
        }
    }

    /// If this expression is a bare input reference, return its ordinal.
    pub fn as_input_ref(&self) -> Option<usize> {
        match self {
            RexExpr::InputRef(i) => Some(*i),
            _ => None,
        }
    }

    /// Return all input ordinals referenced by this expression.
    pub fn input_refs(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_input_refs(&mut out);
        out
    }

    fn collect_input_refs(&self, out: &mut Vec<usize>) {
        match self {
            RexExpr::InputRef(i) => out.push(*i),
            RexExpr::Literal(_) => {}
            RexExpr::BinaryOp { left, right, .. } => {
                left.collect_input_refs(out);
                right.collect_input_refs(out);
            }
            RexExpr::UnaryOp { operand, .. } => operand.collect_input_refs(out),
            RexExpr::Call { args, .. } => {
                for a in args {
                    a.collect_input_refs(out);
                }
            }
            RexExpr::And(exprs) | RexExpr::Or(exprs) => {
                for e in exprs {
                    e.collect_input_refs(out);
                }
            }
        }
    }

    /// Flatten AND-chains: `(A AND (B AND C))` becomes `[A, B, C]`.
    pub fn conjuncts(&self) -> Vec<&RexExpr> {
        match self {
            RexExpr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Rewrite every input reference through `remap`. Used by rules that
    /// permute operator inputs (e.g. join commutation).
    pub fn permute_inputs(&self, remap: &impl Fn(usize) -> usize) -> RexExpr {
        match self {
            RexExpr::InputRef(i) => RexExpr::InputRef(remap(*i)),
            RexExpr::Literal(v) => RexExpr::Literal(v.clone()),
            RexExpr::BinaryOp { op, left, right } => RexExpr::BinaryOp {
                op: *op,
                left: Box::new(left.permute_inputs(remap)),
                right: Box::new(right.permute_inputs(remap)),
            },
            RexExpr::UnaryOp { op, operand } => RexExpr::UnaryOp {
                op: *op,
                operand: Box::new(operand.permute_inputs(remap)),
            },
            RexExpr::Call { function, args } => RexExpr::Call {
                function: function.clone(),
                args: args.iter().map(|a| a.permute_inputs(remap)).collect(),
            },
            RexExpr::And(exprs) => {
                RexExpr::And(exprs.iter().map(|e| e.permute_inputs(remap)).collect())
            }
            RexExpr::Or(exprs) => {
                RexExpr::Or(exprs.iter().map(|e| e.permute_inputs(remap)).collect())
            }
        }
    }

    /// Replace every input reference `i` with `exprs[i]`. Used to collapse
    /// stacked projections. References beyond `exprs` are left unchanged.
    pub fn substitute_inputs(&self, exprs: &[RexExpr]) -> RexExpr {
        match self {
            RexExpr::InputRef(i) => exprs.get(*i).cloned().unwrap_or_else(|| self.clone()),
            RexExpr::Literal(v) => RexExpr::Literal(v.clone()),
            RexExpr::BinaryOp { op, left, right } => RexExpr::BinaryOp {
                op: *op,
                left: Box::new(left.substitute_inputs(exprs)),
                right: Box::new(right.substitute_inputs(exprs)),
            },
            RexExpr::UnaryOp { op, operand } => RexExpr::UnaryOp {
                op: *op,
                operand: Box::new(operand.substitute_inputs(exprs)),
            },
            RexExpr::Call { function, args } => RexExpr::Call {
                function: function.clone(),
                args: args.iter().map(|a| a.substitute_inputs(exprs)).collect(),
            },
            RexExpr::And(list) => {
                RexExpr::And(list.iter().map(|e| e.substitute_inputs(exprs)).collect())
            }
            RexExpr::Or(list) => {
                RexExpr::Or(list.iter().map(|e| e.substitute_inputs(exprs)).collect())
            }
        }
    }
}

impl fmt::Display for RexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexExpr::InputRef(i) => write!(f, "${}", i),
            RexExpr::Literal(v) => write!(f, "{:?}", v),
            RexExpr::BinaryOp { op, left, right } => write!(f, "({} {:?} {})", left, op, right),
            RexExpr::UnaryOp { op, operand } => write!(f, "({:?} {})", op, operand),
            RexExpr::Call { function, args } => {
                write!(f, "{}(", function)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            RexExpr::And(exprs) => {
                write!(f, "AND(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            RexExpr::Or(exprs) => {
                write!(f, "OR(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conjuncts_flatten_nested_ands() {
        let e = RexExpr::And(vec![
            RexExpr::input(0),
            RexExpr::And(vec![RexExpr::input(1), RexExpr::input(2)]),
        ]);
        assert_eq!(e.conjuncts().len(), 3);
    }

    #[test]
    fn test_permute_inputs_swaps_sides() {
        // $0 = $2 over a join of (2, 1) columns, commuted: $0 -> $1, $2 -> $0.
        let cond = RexExpr::eq(RexExpr::input(0), RexExpr::input(2));
        let swapped = cond.permute_inputs(&|i| if i < 2 { i + 1 } else { i - 2 });
        assert_eq!(swapped, RexExpr::eq(RexExpr::input(1), RexExpr::input(0)));
    }

    #[test]
    fn test_substitute_collapses_projection() {
        // top: $0 + 1 over bottom exprs [$3]
        let top = RexExpr::BinaryOp {
            op: BinaryOp::Add,
            left: Box::new(RexExpr::input(0)),
            right: Box::new(RexExpr::int(1)),
        };
        let merged = top.substitute_inputs(&[RexExpr::input(3)]);
        assert_eq!(merged.input_refs(), vec![3]);
    }
}
