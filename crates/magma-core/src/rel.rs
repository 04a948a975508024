//! # Relational Operator Model
//!
//! Operators come in one shape, [`RelCore`]: a variant tag plus the
//! operator-specific payload (predicates, join conditions, aggregate
//! descriptors, sort keys). Whether an expression is logical or physical is
//! not a property of the variant -- it is carried by the convention trait on
//! the expression's trait set. This lets rules match on variants and traits
//! uniformly.
//!
//! Two node forms exist:
//!
//! - [`RelTree`] is the *buildable* form: what embedders hand to the
//!   optimizer and what rules construct. Its children are either nested
//!   trees or references to already-registered memo subsets.
//! - [`RelNode`] is the *registered* form living in the memo arena: immutable,
//!   with a stable integer identity, a complete trait set, and children that
//!   are always subset references. Substituting a better member of a child
//!   subset therefore never requires rewriting parents.

use crate::scalar::{RexExpr, ScalarValue};
use crate::traits::{RelCollation, TraitSet};
use crate::types::{RelRowType, TableRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a registered expression. Monotonically assigned, unique and
/// valid for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelNodeId(pub u32);

/// Identity of an equivalence set in the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetId(pub u32);

/// Identity of a subset (the members of a set sharing one trait set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubsetId(pub u32);

impl fmt::Display for RelNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel#{}", self.0)
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set#{}", self.0)
    }
}

impl fmt::Display for SubsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subset#{}", self.0)
    }
}

/// SQL join types.
///
/// The join type affects which rows are produced and which rules apply: only
/// inner joins are commutable by the built-in rules, and semi/anti joins
/// project no right-side columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    /// Inner join: only matching rows from both sides.
    Inner,
    /// Left outer join: all rows from left, matching from right (or NULLs).
    Left,
    /// Right outer join: all rows from right, matching from left (or NULLs).
    Right,
    /// Full outer join: all rows from both sides, NULLs where no match.
    Full,
    /// Semi join: left rows with at least one match (no right columns).
    Semi,
    /// Anti join: left rows with no match on the right.
    Anti,
}

impl JoinKind {
    /// Whether right-side columns appear in the output row.
    pub fn projects_right(&self) -> bool {
        !matches!(self, JoinKind::Semi | JoinKind::Anti)
    }

    /// Whether the right side can generate nulls in the output.
    pub fn generates_nulls_on_right(&self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }

    /// Whether the left side can generate nulls in the output.
    pub fn generates_nulls_on_left(&self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }
}

/// Aggregate functions supported by aggregate descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate computation: function, argument ordinals and output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    pub args: Vec<usize>,
    pub distinct: bool,
    pub name: String,
}

impl AggCall {
    pub fn new(func: AggFunc, args: Vec<usize>, name: impl Into<String>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            name: name.into(),
        }
    }
}

/// Set-operation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

/// Variant tag plus operator-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelCore {
    /// Reads rows from a base table. Always a leaf.
    TableScan { table: TableRef },
    /// Discards rows not matching the predicate.
    Filter { predicate: RexExpr },
    /// Computes output expressions from the input row; field names live in
    /// the node's row type.
    Project { exprs: Vec<RexExpr> },
    /// Combines two inputs; the condition indexes the concatenated row.
    Join { kind: JoinKind, condition: RexExpr },
    /// Groups by the (sorted) key ordinals and computes aggregate calls.
    /// Output layout: group fields first, then one field per call.
    Aggregate {
        group_keys: Vec<usize>,
        calls: Vec<AggCall>,
    },
    /// Union/intersect/except over two or more inputs.
    SetOp { kind: SetOpKind, all: bool },
    /// Orders the output; optionally skips `offset` rows and keeps `fetch`.
    Sort {
        collation: RelCollation,
        offset: Option<u64>,
        fetch: Option<u64>,
    },
    /// Literal row constructor. Always a leaf.
    Values { tuples: Vec<Vec<ScalarValue>> },
    /// Abstract converter: a synthetic placeholder that promises its input
    /// subset in the node's own (target) trait set. Expanded into concrete
    /// enforcers by the conversion rule; never part of a final plan.
    Converter,
}

impl RelCore {
    pub fn kind(&self) -> RelKind {
        match self {
            RelCore::TableScan { .. } => RelKind::TableScan,
            RelCore::Filter { .. } => RelKind::Filter,
            RelCore::Project { .. } => RelKind::Project,
            RelCore::Join { .. } => RelKind::Join,
            RelCore::Aggregate { .. } => RelKind::Aggregate,
            RelCore::SetOp { .. } => RelKind::SetOp,
            RelCore::Sort { .. } => RelKind::Sort,
            RelCore::Values { .. } => RelKind::Values,
            RelCore::Converter => RelKind::Converter,
        }
    }
}

/// Variant discriminant without payload, used for rule dispatch and the
/// metadata dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelKind {
    TableScan,
    Filter,
    Project,
    Join,
    Aggregate,
    SetOp,
    Sort,
    Values,
    Converter,
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A registered, immutable expression in the memo arena.
#[derive(Debug, Clone)]
pub struct RelNode {
    pub id: RelNodeId,
    pub core: RelCore,
    pub row_type: RelRowType,
    pub traits: TraitSet,
    /// Children are always subsets; see the module docs.
    pub inputs: Vec<SubsetId>,
}

impl RelNode {
    pub fn kind(&self) -> RelKind {
        self.core.kind()
    }
}

/// Child of a buildable tree: an unregistered nested node or an existing
/// subset reference (what `RuleCall::convert` hands back).
#[derive(Debug, Clone)]
pub enum RelInput {
    Subset(SubsetId),
    Node(Box<RelTree>),
}

impl From<RelTree> for RelInput {
    fn from(tree: RelTree) -> Self {
        RelInput::Node(Box::new(tree))
    }
}

impl From<SubsetId> for RelInput {
    fn from(subset: SubsetId) -> Self {
        RelInput::Subset(subset)
    }
}

/// A buildable expression tree, the pre-registration form.
///
/// The trait set may be partial; registration completes it from the axis
/// defaults (for user-supplied roots) or from the matched expression's
/// traits (for rule products).
#[derive(Debug, Clone)]
pub struct RelTree {
    pub core: RelCore,
    pub row_type: RelRowType,
    pub traits: TraitSet,
    pub inputs: Vec<RelInput>,
}

impl RelTree {
    pub fn new(core: RelCore, row_type: RelRowType, traits: TraitSet, inputs: Vec<RelInput>) -> Self {
        Self {
            core,
            row_type,
            traits,
            inputs,
        }
    }

    pub fn kind(&self) -> RelKind {
        self.core.kind()
    }
}

/// An extracted plan: the cheapest member at every subset of the winning
/// tree, materialized back into an ordinary tree for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelPlan {
    pub core: RelCore,
    pub row_type: RelRowType,
    pub traits: TraitSet,
    pub inputs: Vec<RelPlan>,
}

impl RelPlan {
    /// Number of nodes in the plan tree.
    pub fn node_count(&self) -> usize {
        1 + self.inputs.iter().map(RelPlan::node_count).sum::<usize>()
    }

    /// Pre-order list of operator kinds, handy for plan-shape assertions.
    pub fn kinds(&self) -> Vec<RelKind> {
        let mut out = vec![self.core.kind()];
        for input in &self.inputs {
            out.extend(input.kinds());
        }
        out
    }

    /// Indented textual rendering of the plan for tracing output.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(0, &mut out);
        out
    }

    fn explain_into(&self, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&format!("{} {}\n", self.core.kind(), self.traits));
        for input in &self.inputs {
            input.explain_into(depth + 1, out);
        }
    }
}

impl fmt::Display for RelPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explain())
    }
}
