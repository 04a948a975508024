//! # Filter Into Join
//!
//! `Filter(Join(a, b))` with an inner join is equivalent to the join with
//! the filter's predicate merged into the join condition. Applying the
//! predicate during the join reduces data earlier and exposes more of the
//! condition to join implementations.

use crate::is_logical;
use magma_core::error::OptError;
use magma_core::rel::{JoinKind, RelCore, RelInput, RelKind, RelTree};
use magma_core::rule::{Rule, RuleCall, RuleOperand};
use magma_core::scalar::RexExpr;

/// Merges a filter's predicate into the inner join condition below it.
pub struct FilterIntoJoinRule;

impl Rule for FilterIntoJoinRule {
    fn name(&self) -> &str {
        "FilterIntoJoin"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(
            RelKind::Filter,
            vec![
                RuleOperand::of(RelKind::Join, vec![RuleOperand::any(), RuleOperand::any()])
                    .with_predicate(is_logical),
            ],
        )
        .with_predicate(is_logical)
    }

    fn matches(&self, call: &RuleCall<'_>) -> bool {
        matches!(
            call.rel(1).core,
            RelCore::Join {
                kind: JoinKind::Inner,
                ..
            }
        )
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let filter = call.rel(0);
        let row_type = filter.row_type.clone();
        let RelCore::Filter { predicate } = &filter.core else {
            return Ok(());
        };
        let predicate = predicate.clone();
        let RelCore::Join { condition, .. } = &call.rel(1).core else {
            return Ok(());
        };
        let merged = RexExpr::and_all(vec![condition.clone(), predicate]);

        let left = call.child_subset(1, 0);
        let right = call.child_subset(1, 1);
        call.transform_to(RelTree::new(
            RelCore::Join {
                kind: JoinKind::Inner,
                condition: merged,
            },
            row_type,
            call.default_traits(),
            vec![RelInput::Subset(left), RelInput::Subset(right)],
        ));
        Ok(())
    }
}
