//! # Built-in Metadata Providers
//!
//! The default dispatch table from `(metadata kind, operator variant)` to
//! handler functions. Derivations are catalog- and heuristics-driven:
//!
//! - Row counts flow bottom-up from catalog statistics, scaled by predicate
//!   selectivity guesses.
//! - Selectivity guesses use the standard constants: equality 0.15, ordering
//!   comparisons 0.5, `IS NOT NULL` 0.9, anything else 0.25. Conjunctions
//!   multiply under an independence assumption; disjunctions use
//!   inclusion-exclusion.
//! - Unique keys come from catalog table keys and aggregate group keys, and
//!   survive filters, sorts, projections of identity columns, and joins
//!   against sides that are unique on their join columns.
//! - Collations come from declared table collations; projections permute
//!   them through identity columns and sorts manufacture them.
//! - Sizes are type-driven defaults, with unions weighted by row count.

use crate::catalog::DEFAULT_TABLE_ROW_COUNT;
use crate::cost::Cost;
use crate::metadata::{
    ColumnOrigin, MdArgs, MdHandler, MdValue, Metadata, MetadataKind, MetadataProvider,
    PredicateList,
};
use crate::rel::{RelCore, RelKind, RelNode, RelNodeId, SetOpKind};
use crate::scalar::{BinaryOp, RexExpr, ScalarValue, UnaryOp};
use crate::traits::{FieldCollation, RelCollation};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Estimate the fraction of rows passing a predicate.
pub fn guess_selectivity(predicate: Option<&RexExpr>) -> f64 {
    match predicate {
        None => 1.0,
        Some(e) => guess_one(e),
    }
}

fn guess_one(e: &RexExpr) -> f64 {
    match e {
        RexExpr::And(conjuncts) => conjuncts.iter().map(guess_one).product(),
        RexExpr::Or(disjuncts) => {
            // Inclusion-exclusion under independence:
            // sel(A OR B) = 1 - (1 - sel(A)) * (1 - sel(B)).
            1.0 - disjuncts.iter().map(|d| 1.0 - guess_one(d)).product::<f64>()
        }
        RexExpr::UnaryOp {
            op: UnaryOp::IsNotNull,
            ..
        } => 0.9,
        RexExpr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => 1.0 - guess_one(operand),
        RexExpr::BinaryOp {
            op: BinaryOp::Eq, ..
        } => 0.15,
        RexExpr::BinaryOp { op, .. } if op.is_comparison() => 0.5,
        RexExpr::Literal(ScalarValue::Bool(true)) => 1.0,
        RexExpr::Literal(ScalarValue::Bool(false)) => 0.0,
        _ => 0.25,
    }
}

/// Permute collations through projection expressions: an input collation
/// survives for as long a prefix as its fields are projected identically.
pub fn permute_collations(input: &[RelCollation], exprs: &[RexExpr]) -> Vec<RelCollation> {
    let mut map: HashMap<usize, usize> = HashMap::new();
    for (pos, e) in exprs.iter().enumerate() {
        if let Some(i) = e.as_input_ref() {
            map.entry(i).or_insert(pos);
        }
    }
    let mut out = Vec::new();
    for collation in input {
        let mut fields = Vec::new();
        for fc in &collation.fields {
            match map.get(&fc.field) {
                Some(&pos) => fields.push(FieldCollation::new(pos, fc.direction, fc.null_direction)),
                None => break,
            }
        }
        if !fields.is_empty() {
            out.push(RelCollation::of(fields));
        }
    }
    out
}

/// Representative member of the i-th input subset, for logical derivations.
fn child_rep(md: &Metadata<'_>, node: &RelNode, i: usize) -> Option<RelNodeId> {
    node.inputs
        .get(i)
        .and_then(|&s| md.memo().representative(s))
}

fn child_rows(md: &Metadata<'_>, node: &RelNode, i: usize) -> f64 {
    node.inputs
        .get(i)
        .map(|&s| md.subset_row_count(s))
        .unwrap_or(1.0)
}

// --- row count -------------------------------------------------------------

fn row_count_scan(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::TableScan { table } = &node.core else {
        return None;
    };
    let rows = md
        .catalog()
        .row_count(table)
        .unwrap_or(DEFAULT_TABLE_ROW_COUNT);
    Some(MdValue::Double(rows))
}

fn row_count_filter(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Filter { predicate } = &node.core else {
        return None;
    };
    let rows = child_rows(md, node, 0) * guess_selectivity(Some(predicate));
    Some(MdValue::Double(rows))
}

fn row_count_join(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Join { kind, condition } = &node.core else {
        return None;
    };
    let left = child_rows(md, node, 0);
    let right = child_rows(md, node, 1);
    let sel = guess_selectivity(Some(condition));
    let rows = match kind {
        crate::rel::JoinKind::Semi => left * sel,
        crate::rel::JoinKind::Anti => (left * (1.0 - sel)).max(0.0),
        _ => left * right * sel,
    };
    Some(MdValue::Double(rows))
}

fn row_count_aggregate(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Aggregate { group_keys, .. } = &node.core else {
        return None;
    };
    if group_keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    let input_rows = child_rows(md, node, 0);
    let groups = child_rep(md, node, 0)
        .and_then(|rep| md.distinct_row_count(rep, group_keys, None))
        .unwrap_or(input_rows / 2.0);
    Some(MdValue::Double(groups.min(input_rows)))
}

fn row_count_setop(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::SetOp { kind, .. } = &node.core else {
        return None;
    };
    let counts: Vec<f64> = (0..node.inputs.len())
        .map(|i| child_rows(md, node, i))
        .collect();
    let rows = match kind {
        SetOpKind::Union => counts.iter().sum(),
        SetOpKind::Intersect => counts.iter().cloned().fold(f64::INFINITY, f64::min) * 0.5,
        SetOpKind::Except => counts.first().copied().unwrap_or(1.0) * 0.5,
    };
    Some(MdValue::Double(rows))
}

fn row_count_sort(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Sort { offset, fetch, .. } = &node.core else {
        return None;
    };
    let mut rows = child_rows(md, node, 0);
    if let Some(offset) = offset {
        rows = (rows - *offset as f64).max(0.0);
    }
    if let Some(fetch) = fetch {
        rows = rows.min(*fetch as f64);
    }
    Some(MdValue::Double(rows))
}

fn row_count_values(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Values { tuples } = &node.core else {
        return None;
    };
    Some(MdValue::Double(tuples.len() as f64))
}

fn row_count_any(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    // Pass-through default: project, converter and anything row-preserving.
    if node.inputs.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    Some(MdValue::Double(child_rows(md, node, 0)))
}

// --- max row count ---------------------------------------------------------

fn max_row_count_unbounded(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Double(f64::INFINITY))
}

fn max_row_count_values(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Values { tuples } = &node.core else {
        return None;
    };
    Some(MdValue::Double(tuples.len() as f64))
}

fn max_row_count_sort(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Sort { offset, fetch, .. } = &node.core else {
        return None;
    };
    let mut max = node
        .inputs
        .first()
        .map(|&s| md.subset_max_row_count(s))
        .unwrap_or(f64::INFINITY);
    if let Some(offset) = offset {
        max = (max - *offset as f64).max(0.0);
    }
    if let Some(fetch) = fetch {
        max = max.min(*fetch as f64);
    }
    Some(MdValue::Double(max))
}

fn max_row_count_join(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Join { kind, .. } = &node.core else {
        return None;
    };
    let left = node
        .inputs
        .first()
        .map(|&s| md.subset_max_row_count(s))
        .unwrap_or(f64::INFINITY);
    let right = node
        .inputs
        .get(1)
        .map(|&s| md.subset_max_row_count(s))
        .unwrap_or(f64::INFINITY);
    let max = match kind {
        crate::rel::JoinKind::Semi | crate::rel::JoinKind::Anti => left,
        _ => left * right,
    };
    Some(MdValue::Double(max))
}

fn max_row_count_aggregate(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Aggregate { group_keys, .. } = &node.core else {
        return None;
    };
    if group_keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    let max = node
        .inputs
        .first()
        .map(|&s| md.subset_max_row_count(s))
        .unwrap_or(f64::INFINITY);
    Some(MdValue::Double(max))
}

fn max_row_count_setop(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::SetOp { kind, .. } = &node.core else {
        return None;
    };
    let maxes: Vec<f64> = node
        .inputs
        .iter()
        .map(|&s| md.subset_max_row_count(s))
        .collect();
    let max = match kind {
        SetOpKind::Union => maxes.iter().sum(),
        SetOpKind::Intersect => maxes.iter().cloned().fold(f64::INFINITY, f64::min),
        SetOpKind::Except => maxes.first().copied().unwrap_or(f64::INFINITY),
    };
    Some(MdValue::Double(max))
}

fn max_row_count_passthrough(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let max = node
        .inputs
        .first()
        .map(|&s| md.subset_max_row_count(s))
        .unwrap_or(f64::INFINITY);
    Some(MdValue::Double(max))
}

// --- cumulative cost -------------------------------------------------------

fn cumulative_cost_converter(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    // Abstract converters are placeholders; they must never win a subset.
    Some(MdValue::Cost(Cost::Infinite))
}

fn cumulative_cost_any(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let self_cost = md
        .cost_model()
        .self_cost(md, node)
        .unwrap_or_else(Cost::unit);
    let mut total = self_cost;
    for &input in &node.inputs {
        total = total + md.subset_best_cost(input);
    }
    Some(MdValue::Cost(total))
}

// --- selectivity -----------------------------------------------------------

fn selectivity_any(_: &Metadata<'_>, _: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::Predicate(predicate) = args else {
        return None;
    };
    Some(MdValue::Double(guess_selectivity(predicate.as_ref())))
}

// --- distinct row count ----------------------------------------------------

fn distinct_row_count_values(_: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::Values { tuples }, MdArgs::KeysPredicate(keys, _)) = (&node.core, args) else {
        return None;
    };
    if keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    let mut distinct: HashSet<Vec<ScalarValue>> = HashSet::new();
    for tuple in tuples {
        distinct.insert(keys.iter().filter_map(|&k| tuple.get(k).cloned()).collect());
    }
    Some(MdValue::Double(distinct.len() as f64))
}

fn distinct_row_count_aggregate(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::Aggregate { group_keys, .. }, MdArgs::KeysPredicate(keys, predicate)) =
        (&node.core, args)
    else {
        return None;
    };
    if keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    if keys.iter().all(|&k| k < group_keys.len()) {
        // Keys within the group section map straight onto input columns.
        let mapped: Vec<usize> = keys.iter().map(|&k| group_keys[k]).collect();
        let rep = child_rep(md, node, 0)?;
        return md
            .distinct_row_count(rep, &mapped, predicate.as_ref())
            .map(MdValue::Double);
    }
    distinct_row_count_any(md, node, args)
}

fn distinct_row_count_filter(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::KeysPredicate(keys, predicate) = args else {
        return None;
    };
    if keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    let rep = child_rep(md, node, 0)?;
    let child_distinct = md.distinct_row_count(rep, keys, predicate.as_ref())?;
    Some(MdValue::Double(child_distinct.min(md.row_count(node.id))))
}

fn distinct_row_count_any(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::KeysPredicate(keys, predicate) = args else {
        return None;
    };
    if keys.is_empty() {
        return Some(MdValue::Double(1.0));
    }
    let rows = md.row_count(node.id);
    let sel = guess_selectivity(predicate.as_ref());
    let distinct = if md.are_columns_unique(node.id, keys) == Some(true) {
        rows * sel
    } else {
        // No per-column statistics in the catalog contract; guess half the
        // rows are distinct over an arbitrary key.
        (rows / 2.0) * sel
    };
    Some(MdValue::Double(distinct.min(rows).max(1.0)))
}

// --- unique keys -----------------------------------------------------------

fn unique_keys_scan(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::TableScan { table } = &node.core else {
        return None;
    };
    Some(MdValue::Keys(md.catalog().unique_keys(table)))
}

fn unique_keys_aggregate(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Aggregate { group_keys, .. } = &node.core else {
        return None;
    };
    if group_keys.is_empty() {
        // A global aggregate produces a single row; the empty key is unique.
        return Some(MdValue::Keys(vec![vec![]]));
    }
    Some(MdValue::Keys(vec![(0..group_keys.len()).collect()]))
}

fn unique_keys_passthrough(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let rep = child_rep(md, node, 0)?;
    md.unique_keys(rep).map(MdValue::Keys)
}

fn unique_keys_project(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Project { exprs } = &node.core else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    let child_keys = md.unique_keys(rep)?;
    let mut map: HashMap<usize, usize> = HashMap::new();
    for (pos, e) in exprs.iter().enumerate() {
        if let Some(i) = e.as_input_ref() {
            map.entry(i).or_insert(pos);
        }
    }
    let mut out = Vec::new();
    for key in child_keys {
        if let Some(mapped) = key
            .iter()
            .map(|c| map.get(c).copied())
            .collect::<Option<Vec<usize>>>()
        {
            out.push(mapped);
        }
    }
    Some(MdValue::Keys(out))
}

fn unique_keys_join(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Join { kind, condition } = &node.core else {
        return None;
    };
    let left_rep = child_rep(md, node, 0)?;
    if !kind.projects_right() {
        // Semi/anti joins emit a subset of left rows; left keys survive.
        return md.unique_keys(left_rep).map(MdValue::Keys);
    }
    if *kind != crate::rel::JoinKind::Inner {
        return None;
    }
    let right_rep = child_rep(md, node, 1)?;
    let left_arity = md.memo().subset_row_type(node.inputs[0]).arity();
    let (left_cols, right_cols) = equi_join_columns(condition, left_arity);

    let mut out = Vec::new();
    // Left keys stay unique when each left row matches at most one right row.
    if !right_cols.is_empty() && md.are_columns_unique(right_rep, &right_cols) == Some(true) {
        if let Some(keys) = md.unique_keys(left_rep) {
            out.extend(keys);
        }
    }
    // And symmetrically for the right side, shifted into output positions.
    if !left_cols.is_empty() && md.are_columns_unique(left_rep, &left_cols) == Some(true) {
        if let Some(keys) = md.unique_keys(right_rep) {
            out.extend(
                keys.into_iter()
                    .map(|key| key.into_iter().map(|c| c + left_arity).collect()),
            );
        }
    }
    Some(MdValue::Keys(out))
}

/// Split an equi-join condition into (left columns, right columns as
/// right-input ordinals).
fn equi_join_columns(condition: &RexExpr, left_arity: usize) -> (Vec<usize>, Vec<usize>) {
    let mut left_cols = Vec::new();
    let mut right_cols = Vec::new();
    for conjunct in condition.conjuncts() {
        if let RexExpr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } = conjunct
        {
            if let (Some(a), Some(b)) = (left.as_input_ref(), right.as_input_ref()) {
                let (l, r) = if a < left_arity { (a, b) } else { (b, a) };
                if l < left_arity && r >= left_arity {
                    left_cols.push(l);
                    right_cols.push(r - left_arity);
                }
            }
        }
    }
    (left_cols, right_cols)
}

// --- columns unique --------------------------------------------------------

fn columns_unique_any(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::Keys(keys) = args else {
        return None;
    };
    let unique_keys = md.unique_keys(node.id)?;
    let covered = unique_keys
        .iter()
        .any(|uk| uk.iter().all(|c| keys.contains(c)));
    Some(MdValue::Bool(covered))
}

// --- column origins --------------------------------------------------------

fn column_origins_scan(_: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::TableScan { table }, MdArgs::Column(column)) = (&node.core, args) else {
        return None;
    };
    Some(MdValue::Origins(vec![ColumnOrigin {
        table: table.clone(),
        column: *column,
        derived: false,
    }]))
}

fn column_origins_passthrough(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::Column(column) = args else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    md.column_origins(rep, *column).map(MdValue::Origins)
}

fn column_origins_project(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::Project { exprs }, MdArgs::Column(column)) = (&node.core, args) else {
        return None;
    };
    let expr = exprs.get(*column)?;
    let rep = child_rep(md, node, 0)?;
    if let Some(i) = expr.as_input_ref() {
        return md.column_origins(rep, i).map(MdValue::Origins);
    }
    // Non-identity projection: every referenced input contributes, derived.
    let mut out = Vec::new();
    for i in expr.input_refs() {
        for origin in md.column_origins(rep, i)? {
            out.push(ColumnOrigin {
                derived: true,
                ..origin
            });
        }
    }
    Some(MdValue::Origins(out))
}

fn column_origins_join(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::Join { kind, .. }, MdArgs::Column(column)) = (&node.core, args) else {
        return None;
    };
    let left_arity = md.memo().subset_row_type(node.inputs[0]).arity();
    let (rep, col, nullable_side) = if *column < left_arity {
        (child_rep(md, node, 0)?, *column, kind.generates_nulls_on_left())
    } else {
        (
            child_rep(md, node, 1)?,
            *column - left_arity,
            kind.generates_nulls_on_right(),
        )
    };
    let origins = md.column_origins(rep, col)?;
    let origins = if nullable_side {
        origins
            .into_iter()
            .map(|o| ColumnOrigin { derived: true, ..o })
            .collect()
    } else {
        origins
    };
    Some(MdValue::Origins(origins))
}

fn column_origins_aggregate(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let (RelCore::Aggregate { group_keys, calls }, MdArgs::Column(column)) = (&node.core, args)
    else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    if *column < group_keys.len() {
        return md
            .column_origins(rep, group_keys[*column])
            .map(MdValue::Origins);
    }
    let call = calls.get(*column - group_keys.len())?;
    let mut out = Vec::new();
    for &arg in &call.args {
        for origin in md.column_origins(rep, arg)? {
            out.push(ColumnOrigin {
                derived: true,
                ..origin
            });
        }
    }
    Some(MdValue::Origins(out))
}

fn column_origins_setop(md: &Metadata<'_>, node: &RelNode, args: &MdArgs) -> Option<MdValue> {
    let MdArgs::Column(column) = args else {
        return None;
    };
    let mut out = Vec::new();
    for i in 0..node.inputs.len() {
        let rep = child_rep(md, node, i)?;
        out.extend(md.column_origins(rep, *column)?);
    }
    Some(MdValue::Origins(out))
}

fn column_origins_values(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Origins(Vec::new()))
}

// --- collations ------------------------------------------------------------

fn collations_scan(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::TableScan { table } = &node.core else {
        return None;
    };
    Some(MdValue::Collations(md.catalog().collations(table)))
}

fn collations_sort(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Sort { collation, .. } = &node.core else {
        return None;
    };
    Some(MdValue::Collations(vec![collation.clone()]))
}

fn collations_filter(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let rep = child_rep(md, node, 0)?;
    Some(MdValue::Collations(md.collations(rep)))
}

fn collations_project(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Project { exprs } = &node.core else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    let input = md.collations(rep);
    Some(MdValue::Collations(permute_collations(&input, exprs)))
}

fn collations_converter(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    // A converter's output carries exactly its target traits.
    let collations = match node.traits.collation() {
        Some(c) if !c.is_empty() => vec![c.clone()],
        _ => Vec::new(),
    };
    Some(MdValue::Collations(collations))
}

fn collations_any(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Collations(Vec::new()))
}

// --- predicates ------------------------------------------------------------

fn predicates_leaf(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Predicates(PredicateList::default()))
}

fn predicates_filter(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Filter { predicate } = &node.core else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    let mut list = md.predicates(rep);
    list.pulled_up
        .extend(predicate.conjuncts().into_iter().cloned());
    Some(MdValue::Predicates(list))
}

fn predicates_passthrough(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let rep = child_rep(md, node, 0)?;
    Some(MdValue::Predicates(md.predicates(rep)))
}

fn predicates_project(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Project { exprs } = &node.core else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    let child = md.predicates(rep);
    let mut map: HashMap<usize, usize> = HashMap::new();
    for (pos, e) in exprs.iter().enumerate() {
        if let Some(i) = e.as_input_ref() {
            map.entry(i).or_insert(pos);
        }
    }
    let mut list = PredicateList::default();
    for pred in child.pulled_up {
        if pred.input_refs().iter().all(|i| map.contains_key(i)) {
            list.pulled_up.push(pred.permute_inputs(&|i| map[&i]));
        }
    }
    Some(MdValue::Predicates(list))
}

fn predicates_aggregate(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Aggregate { group_keys, .. } = &node.core else {
        return None;
    };
    let rep = child_rep(md, node, 0)?;
    let child = md.predicates(rep);
    let mut list = PredicateList::default();
    // Only predicates over group keys survive aggregation, remapped to the
    // group section of the output row.
    for pred in child.pulled_up {
        if pred
            .input_refs()
            .iter()
            .all(|i| group_keys.contains(i))
        {
            list.pulled_up.push(
                pred.permute_inputs(&|i| group_keys.iter().position(|&g| g == i).unwrap_or(i)),
            );
        }
    }
    Some(MdValue::Predicates(list))
}

fn predicates_join(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Join { kind, condition } = &node.core else {
        return None;
    };
    let left_rep = child_rep(md, node, 0)?;
    let right_rep = child_rep(md, node, 1)?;
    let left = md.predicates(left_rep);
    let right = md.predicates(right_rep);
    let left_arity = md.memo().subset_row_type(node.inputs[0]).arity();
    let mut list = PredicateList::default();

    match kind {
        crate::rel::JoinKind::Inner => {
            list.pulled_up.extend(left.pulled_up.iter().cloned());
            list.pulled_up.extend(
                right
                    .pulled_up
                    .iter()
                    .map(|p| p.permute_inputs(&|i| i + left_arity)),
            );
            list.pulled_up
                .extend(condition.conjuncts().into_iter().cloned());
        }
        crate::rel::JoinKind::Semi | crate::rel::JoinKind::Anti => {
            list.pulled_up.extend(left.pulled_up.iter().cloned());
            if *kind == crate::rel::JoinKind::Semi {
                // Infer equalities on the outer side: a literal equality on an
                // inner join column transfers across the equi-condition.
                let (left_cols, right_cols) = equi_join_columns(condition, left_arity);
                for pred in &right.pulled_up {
                    if let RexExpr::BinaryOp {
                        op: BinaryOp::Eq,
                        left: l,
                        right: r,
                    } = pred
                    {
                        if let (Some(rc), RexExpr::Literal(v)) = (l.as_input_ref(), r.as_ref()) {
                            if let Some(pos) = right_cols.iter().position(|&c| c == rc) {
                                let inferred = RexExpr::eq(
                                    RexExpr::input(left_cols[pos]),
                                    RexExpr::Literal(v.clone()),
                                );
                                list.pulled_up.push(inferred.clone());
                                list.left_inferred.push(inferred);
                            }
                        }
                    }
                }
            }
        }
        crate::rel::JoinKind::Left => {
            list.pulled_up.extend(left.pulled_up.iter().cloned());
        }
        crate::rel::JoinKind::Right => {
            list.pulled_up.extend(
                right
                    .pulled_up
                    .iter()
                    .map(|p| p.permute_inputs(&|i| i + left_arity)),
            );
        }
        crate::rel::JoinKind::Full => {}
    }
    Some(MdValue::Predicates(list))
}

fn predicates_setop(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    // Only predicates that hold on every input hold on the output.
    let mut common: Option<Vec<RexExpr>> = None;
    for i in 0..node.inputs.len() {
        let rep = child_rep(md, node, i)?;
        let preds = md.predicates(rep).pulled_up;
        common = Some(match common {
            None => preds,
            Some(prev) => prev.into_iter().filter(|p| preds.contains(p)).collect(),
        });
    }
    Some(MdValue::Predicates(PredicateList {
        pulled_up: common.unwrap_or_default(),
        ..PredicateList::default()
    }))
}

// --- sizes -----------------------------------------------------------------

fn average_column_sizes_any(_: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Sizes(
        node.row_type
            .fields
            .iter()
            .map(|f| f.sql_type.average_width())
            .collect(),
    ))
}

fn average_column_sizes_project(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let RelCore::Project { exprs } = &node.core else {
        return None;
    };
    let child_sizes = child_rep(md, node, 0).and_then(|rep| md.average_column_sizes(rep));
    let sizes = exprs
        .iter()
        .enumerate()
        .map(|(pos, e)| match e {
            RexExpr::InputRef(i) => child_sizes
                .as_ref()
                .and_then(|s| s.get(*i).copied())
                .unwrap_or_else(|| node.row_type.field(pos).sql_type.average_width()),
            RexExpr::Literal(v) => v.width(),
            _ => node.row_type.field(pos).sql_type.average_width(),
        })
        .collect();
    Some(MdValue::Sizes(sizes))
}

fn average_column_sizes_join(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let left = child_rep(md, node, 0).and_then(|rep| md.average_column_sizes(rep))?;
    let mut sizes = left;
    if node.row_type.arity() > sizes.len() {
        let right = child_rep(md, node, 1).and_then(|rep| md.average_column_sizes(rep))?;
        sizes.extend(right);
    }
    Some(MdValue::Sizes(sizes))
}

fn average_column_sizes_union(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    // Weighted average per column, weights being the input row counts.
    let arity = node.row_type.arity();
    let mut weighted = vec![0.0; arity];
    let mut total_rows = 0.0;
    for i in 0..node.inputs.len() {
        let rep = child_rep(md, node, i)?;
        let sizes = md.average_column_sizes(rep)?;
        let rows = child_rows(md, node, i);
        for (w, s) in weighted.iter_mut().zip(sizes.iter()) {
            *w += rows * s;
        }
        total_rows += rows;
    }
    if total_rows <= 0.0 {
        return average_column_sizes_any(md, node, &MdArgs::None);
    }
    Some(MdValue::Sizes(
        weighted.into_iter().map(|w| w / total_rows).collect(),
    ))
}

fn average_row_size_any(md: &Metadata<'_>, node: &RelNode, _: &MdArgs) -> Option<MdValue> {
    let sizes = md.average_column_sizes(node.id)?;
    Some(MdValue::Double(sizes.iter().sum()))
}

// --- parallelism / memory stubs --------------------------------------------

fn memory_unknown(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    None
}

fn split_count_any(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Double(1.0))
}

fn phase_transition_any(_: &Metadata<'_>, _: &RelNode, _: &MdArgs) -> Option<MdValue> {
    Some(MdValue::Bool(false))
}

// --- the dispatch table ----------------------------------------------------

type HandlerFn = fn(&Metadata<'_>, &RelNode, &MdArgs) -> Option<MdValue>;

/// The built-in provider: a table from `(kind, variant)` to handlers,
/// populated once at construction. Lookup tries the exact variant first,
/// then the any-variant fallback.
pub struct DefaultMetadataProvider {
    table: HashMap<(MetadataKind, Option<RelKind>), MdHandler>,
}

impl Default for DefaultMetadataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultMetadataProvider {
    pub fn new() -> Self {
        let mut provider = Self {
            table: HashMap::new(),
        };
        use MetadataKind::*;
        use RelKind::*;

        provider.add(RowCount, Some(TableScan), row_count_scan);
        provider.add(RowCount, Some(Filter), row_count_filter);
        provider.add(RowCount, Some(Join), row_count_join);
        provider.add(RowCount, Some(Aggregate), row_count_aggregate);
        provider.add(RowCount, Some(SetOp), row_count_setop);
        provider.add(RowCount, Some(Sort), row_count_sort);
        provider.add(RowCount, Some(Values), row_count_values);
        provider.add(RowCount, None, row_count_any);

        provider.add(MaxRowCount, Some(TableScan), max_row_count_unbounded);
        provider.add(MaxRowCount, Some(Values), max_row_count_values);
        provider.add(MaxRowCount, Some(Sort), max_row_count_sort);
        provider.add(MaxRowCount, Some(Join), max_row_count_join);
        provider.add(MaxRowCount, Some(Aggregate), max_row_count_aggregate);
        provider.add(MaxRowCount, Some(SetOp), max_row_count_setop);
        provider.add(MaxRowCount, Some(Filter), max_row_count_passthrough);
        provider.add(MaxRowCount, Some(Project), max_row_count_passthrough);
        provider.add(MaxRowCount, Some(Converter), max_row_count_passthrough);
        provider.add(MaxRowCount, None, max_row_count_unbounded);

        provider.add(CumulativeCost, Some(Converter), cumulative_cost_converter);
        provider.add(CumulativeCost, None, cumulative_cost_any);

        provider.add(Selectivity, None, selectivity_any);

        provider.add(DistinctRowCount, Some(Values), distinct_row_count_values);
        provider.add(DistinctRowCount, Some(Aggregate), distinct_row_count_aggregate);
        provider.add(DistinctRowCount, Some(Filter), distinct_row_count_filter);
        provider.add(DistinctRowCount, None, distinct_row_count_any);

        provider.add(UniqueKeys, Some(TableScan), unique_keys_scan);
        provider.add(UniqueKeys, Some(Aggregate), unique_keys_aggregate);
        provider.add(UniqueKeys, Some(Filter), unique_keys_passthrough);
        provider.add(UniqueKeys, Some(Sort), unique_keys_passthrough);
        provider.add(UniqueKeys, Some(Converter), unique_keys_passthrough);
        provider.add(UniqueKeys, Some(Project), unique_keys_project);
        provider.add(UniqueKeys, Some(Join), unique_keys_join);

        provider.add(ColumnsUnique, None, columns_unique_any);

        provider.add(ColumnOrigins, Some(TableScan), column_origins_scan);
        provider.add(ColumnOrigins, Some(Filter), column_origins_passthrough);
        provider.add(ColumnOrigins, Some(Sort), column_origins_passthrough);
        provider.add(ColumnOrigins, Some(Converter), column_origins_passthrough);
        provider.add(ColumnOrigins, Some(Project), column_origins_project);
        provider.add(ColumnOrigins, Some(Join), column_origins_join);
        provider.add(ColumnOrigins, Some(Aggregate), column_origins_aggregate);
        provider.add(ColumnOrigins, Some(SetOp), column_origins_setop);
        provider.add(ColumnOrigins, Some(Values), column_origins_values);

        provider.add(Collations, Some(TableScan), collations_scan);
        provider.add(Collations, Some(Sort), collations_sort);
        provider.add(Collations, Some(Filter), collations_filter);
        provider.add(Collations, Some(Project), collations_project);
        provider.add(Collations, Some(Converter), collations_converter);
        provider.add(Collations, None, collations_any);

        provider.add(Predicates, Some(TableScan), predicates_leaf);
        provider.add(Predicates, Some(Values), predicates_leaf);
        provider.add(Predicates, Some(Filter), predicates_filter);
        provider.add(Predicates, Some(Sort), predicates_passthrough);
        provider.add(Predicates, Some(Converter), predicates_passthrough);
        provider.add(Predicates, Some(Project), predicates_project);
        provider.add(Predicates, Some(Aggregate), predicates_aggregate);
        provider.add(Predicates, Some(Join), predicates_join);
        provider.add(Predicates, Some(SetOp), predicates_setop);

        provider.add(AverageColumnSizes, Some(Project), average_column_sizes_project);
        provider.add(AverageColumnSizes, Some(Join), average_column_sizes_join);
        provider.add(AverageColumnSizes, Some(SetOp), average_column_sizes_union);
        provider.add(AverageColumnSizes, None, average_column_sizes_any);
        provider.add(AverageRowSize, None, average_row_size_any);

        provider.add(Memory, None, memory_unknown);
        provider.add(CumulativeMemoryWithinPhase, None, memory_unknown);
        provider.add(SplitCount, None, split_count_any);
        provider.add(PhaseTransition, None, phase_transition_any);

        provider
    }

    fn add(&mut self, kind: MetadataKind, variant: Option<RelKind>, handler: HandlerFn) {
        self.table.insert((kind, variant), Arc::new(handler));
    }
}

impl MetadataProvider for DefaultMetadataProvider {
    fn handler(&self, kind: MetadataKind, variant: RelKind) -> Option<MdHandler> {
        self.table
            .get(&(kind, Some(variant)))
            .or_else(|| self.table.get(&(kind, None)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_selectivity_constants() {
        let eq = RexExpr::eq(RexExpr::input(0), RexExpr::int(7));
        assert_eq!(guess_selectivity(Some(&eq)), 0.15);

        let lt = RexExpr::BinaryOp {
            op: BinaryOp::Lt,
            left: Box::new(RexExpr::input(0)),
            right: Box::new(RexExpr::int(7)),
        };
        assert_eq!(guess_selectivity(Some(&lt)), 0.5);

        let not_null = RexExpr::UnaryOp {
            op: UnaryOp::IsNotNull,
            operand: Box::new(RexExpr::input(0)),
        };
        assert_eq!(guess_selectivity(Some(&not_null)), 0.9);
        assert_eq!(guess_selectivity(None), 1.0);
    }

    #[test]
    fn test_and_multiplies_or_includes_excludes() {
        let eq = RexExpr::eq(RexExpr::input(0), RexExpr::int(1));
        let and = RexExpr::And(vec![eq.clone(), eq.clone()]);
        assert!((guess_selectivity(Some(&and)) - 0.15 * 0.15).abs() < 1e-9);

        let or = RexExpr::Or(vec![eq.clone(), eq]);
        let expected = 1.0 - (1.0 - 0.15) * (1.0 - 0.15);
        assert!((guess_selectivity(Some(&or)) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_permute_collations_follows_identity_columns() {
        let input = vec![RelCollation::of(vec![FieldCollation::asc(0)])];
        // Project swaps the two columns: field 0 surfaces at position 1.
        let swapped = permute_collations(&input, &[RexExpr::input(1), RexExpr::input(0)]);
        assert_eq!(swapped, vec![RelCollation::of(vec![FieldCollation::asc(1)])]);

        // A computed column breaks the prefix.
        let broken = permute_collations(&input, &[RexExpr::int(1)]);
        assert!(broken.is_empty());
    }
}
