//! # magma-rules: Reference Rule Library
//!
//! The default rule set for the magma optimizer, exercising every core seam:
//! trait conversion, collation derivation, set merging and cost-based
//! choice between alternatives.
//!
//! ## Transformation Rules (logical -> logical)
//!
//! - **`FilterIntoJoinRule`**: merges a filter's predicate into the inner
//!   join condition below it, enabling earlier data reduction.
//! - **`JoinCommuteRule`**: swaps the inputs of an inner join, compensating
//!   with a projection that restores the original column order.
//! - **`ProjectMergeRule`**: collapses stacked projections by substituting
//!   the lower projection's expressions into the upper one.
//!
//! ## Implementation Rules (logical -> `PHYSICAL`)
//!
//! - **`PhysScanRule`**: physical table scan, stamped with the table's
//!   declared collation from the catalog.
//! - **`PhysFilterRule`** / **`PhysProjectRule`**: physical filter and
//!   projection; output collation is derived from collation metadata (a
//!   projection permutes its input's order through identity columns).
//! - **`PhysAggRule`**: sort-based aggregate; requires its input collated on
//!   the group keys and inherits that order on its output.
//! - **`PhysSortRule`**: physical sort for explicit logical sorts.
//! - **`PhysJoinRule`**: physical join over physical inputs.
//!
//! `default_rules` bundles the full set together with the core's
//! `ExpandConversionRule` so that collation requirements can be enforced by
//! inserted sorts.

pub mod filter_join;
pub mod join_commute;
pub mod physical;
pub mod project_merge;

use magma_core::convert::ExpandConversionRule;
use magma_core::rel::RelNode;
use magma_core::rule::Rule;
use magma_core::traits::Convention;
use std::sync::Arc;

/// True when the node is still in the logical (`NONE`) convention.
pub(crate) fn is_logical(node: &RelNode) -> bool {
    !node
        .traits
        .convention()
        .is_some_and(Convention::is_physical)
}

/// The standard rule configuration.
pub fn default_rules() -> Vec<Arc<dyn Rule>> {
    vec![
        // Transformation rules expand the logical search space.
        Arc::new(filter_join::FilterIntoJoinRule),
        Arc::new(join_commute::JoinCommuteRule),
        Arc::new(project_merge::ProjectMergeRule),
        // Implementation rules map logical operators into PHYSICAL.
        Arc::new(physical::PhysScanRule),
        Arc::new(physical::PhysFilterRule),
        Arc::new(physical::PhysProjectRule),
        Arc::new(physical::PhysAggRule),
        Arc::new(physical::PhysSortRule),
        Arc::new(physical::PhysJoinRule),
        // Enforcer expansion comes from the core.
        Arc::new(ExpandConversionRule),
    ]
}
