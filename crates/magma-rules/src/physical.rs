//! # Physical Implementation Rules
//!
//! The `PHYSICAL` convention and the rules that implement each logical
//! operator in it. Collation handling is the interesting part:
//!
//! - The scan stamps the table's *declared* collation (from the catalog) on
//!   its physical output, so downstream operators can exploit pre-sorted
//!   storage.
//! - The projection derives its output collation from collation metadata,
//!   which permutes the input's order through identity projections. A
//!   projection that re-orders columns therefore re-labels the collation
//!   instead of losing it.
//! - The aggregate is sort-based: it demands its input collated on the
//!   group keys (the optimizer inserts a sort enforcer when nothing
//!   satisfies that) and keeps the same order on its output, where the
//!   group keys occupy the leading positions.

use crate::is_logical;
use magma_core::error::OptError;
use magma_core::rel::{RelCore, RelKind, RelTree};
use magma_core::rule::{Rule, RuleCall, RuleOperand};
use magma_core::traits::{Convention, FieldCollation, RelCollation, TraitSet, TraitValue};

/// Tag of the built-in physical calling convention.
pub const PHYSICAL: &str = "PHYSICAL";

/// The built-in physical calling convention.
pub fn physical() -> Convention {
    Convention::named(PHYSICAL)
}

fn physical_traits(call: &RuleCall<'_>) -> TraitSet {
    call.default_traits()
        .replace(TraitValue::Convention(physical()))
}

/// Implements a logical table scan as a physical scan carrying the table's
/// declared collation.
pub struct PhysScanRule;

impl Rule for PhysScanRule {
    fn name(&self) -> &str {
        "PhysScan"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::no_inputs(RelKind::TableScan).with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let scan = call.rel(0);
        let id = scan.id;
        let core = scan.core.clone();
        let row_type = scan.row_type.clone();
        let collation = call
            .metadata()
            .collations(id)
            .into_iter()
            .next()
            .unwrap_or_default();
        let traits = physical_traits(call).replace(TraitValue::Collation(collation));
        call.transform_to(RelTree::new(core, row_type, traits, vec![]));
        Ok(())
    }
}

/// Implements a logical filter over a physical input; order passes through.
pub struct PhysFilterRule;

impl Rule for PhysFilterRule {
    fn name(&self) -> &str {
        "PhysFilter"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Filter, vec![RuleOperand::any()]).with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let filter = call.rel(0);
        let id = filter.id;
        let core = filter.core.clone();
        let row_type = filter.row_type.clone();
        let collation = call
            .metadata()
            .collations(id)
            .into_iter()
            .next()
            .unwrap_or_default();
        let child = call.child_subset(0, 0);
        let phys = physical_traits(call);
        let input = call.convert(child, &phys)?;
        let traits = phys.replace(TraitValue::Collation(collation));
        call.transform_to(RelTree::new(core, row_type, traits, vec![input]));
        Ok(())
    }
}

/// Implements a logical projection; the output collation is the input's
/// permuted through the projection's identity columns.
pub struct PhysProjectRule;

impl Rule for PhysProjectRule {
    fn name(&self) -> &str {
        "PhysProj"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Project, vec![RuleOperand::any()]).with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let project = call.rel(0);
        let id = project.id;
        let core = project.core.clone();
        let row_type = project.row_type.clone();
        let collation = call
            .metadata()
            .collations(id)
            .into_iter()
            .next()
            .unwrap_or_default();
        let child = call.child_subset(0, 0);
        let phys = physical_traits(call);
        let input = call.convert(child, &phys)?;
        let traits = phys.replace(TraitValue::Collation(collation));
        call.transform_to(RelTree::new(core, row_type, traits, vec![input]));
        Ok(())
    }
}

/// Implements a logical aggregate as a sort-based physical aggregate: the
/// input must arrive collated on the group keys, and the output keeps that
/// order on its leading (group) columns.
pub struct PhysAggRule;

impl Rule for PhysAggRule {
    fn name(&self) -> &str {
        "PhysAgg"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Aggregate, vec![RuleOperand::any()]).with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let agg = call.rel(0);
        let core = agg.core.clone();
        let row_type = agg.row_type.clone();
        let RelCore::Aggregate { group_keys, .. } = &core else {
            return Ok(());
        };
        let group_keys = group_keys.clone();

        let phys = physical_traits(call);
        let child = call.child_subset(0, 0);
        let input = if group_keys.is_empty() {
            call.convert(child, &phys)?
        } else {
            let input_order = RelCollation::of(
                group_keys.iter().map(|&k| FieldCollation::asc(k)).collect(),
            );
            call.convert(child, &phys.replace(TraitValue::Collation(input_order)))?
        };

        // Group keys land in the leading output positions, in key order, so
        // the demanded input order survives as an output order.
        let output_order = RelCollation::of(
            (0..group_keys.len()).map(FieldCollation::asc).collect(),
        );
        let traits = phys.replace(TraitValue::Collation(output_order));
        call.transform_to(RelTree::new(core, row_type, traits, vec![input]));
        Ok(())
    }
}

/// Implements an explicit logical sort as a physical sort.
pub struct PhysSortRule;

impl Rule for PhysSortRule {
    fn name(&self) -> &str {
        "PhysSort"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Sort, vec![RuleOperand::any()]).with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let sort = call.rel(0);
        let core = sort.core.clone();
        let row_type = sort.row_type.clone();
        let RelCore::Sort { collation, .. } = &core else {
            return Ok(());
        };
        let collation = collation.clone();

        let phys = physical_traits(call);
        let child = call.child_subset(0, 0);
        let input = call.convert(child, &phys)?;
        let traits = phys.replace(TraitValue::Collation(collation));
        call.transform_to(RelTree::new(core, row_type, traits, vec![input]));
        Ok(())
    }
}

/// Implements a logical join over physical inputs. No ordering is promised
/// on the output.
pub struct PhysJoinRule;

impl Rule for PhysJoinRule {
    fn name(&self) -> &str {
        "PhysJoin"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Join, vec![RuleOperand::any(), RuleOperand::any()])
            .with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let join = call.rel(0);
        let core = join.core.clone();
        let row_type = join.row_type.clone();
        let left = call.child_subset(0, 0);
        let right = call.child_subset(0, 1);
        let phys = physical_traits(call);
        let left_input = call.convert(left, &phys)?;
        let right_input = call.convert(right, &phys)?;
        call.transform_to(RelTree::new(
            core,
            row_type,
            phys,
            vec![left_input, right_input],
        ));
        Ok(())
    }
}
