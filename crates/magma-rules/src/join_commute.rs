//! # Join Commutation
//!
//! `A JOIN B` is equivalent to `B JOIN A` for inner joins, with the
//! condition's input references permuted and a projection on top restoring
//! the original column order. Commuting lets cost-based join
//! implementations pick which side to treat as the build/outer side.

use crate::is_logical;
use magma_core::error::OptError;
use magma_core::rel::{JoinKind, RelCore, RelInput, RelKind, RelTree};
use magma_core::rule::{Rule, RuleCall, RuleOperand};
use magma_core::scalar::RexExpr;

/// Swaps the inputs of an inner join.
pub struct JoinCommuteRule;

impl Rule for JoinCommuteRule {
    fn name(&self) -> &str {
        "JoinCommute"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(RelKind::Join, vec![RuleOperand::any(), RuleOperand::any()])
            .with_predicate(is_logical)
    }

    fn matches(&self, call: &RuleCall<'_>) -> bool {
        matches!(
            call.rel(0).core,
            RelCore::Join {
                kind: JoinKind::Inner,
                ..
            }
        )
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let join = call.rel(0);
        let row_type = join.row_type.clone();
        let RelCore::Join { condition, .. } = &join.core else {
            return Ok(());
        };
        let condition = condition.clone();

        let left = call.child_subset(0, 0);
        let right = call.child_subset(0, 1);
        let memo = call.optimizer().memo();
        let left_type = memo.subset_row_type(left).clone();
        let right_type = memo.subset_row_type(right).clone();
        let left_arity = left_type.arity();
        let right_arity = right_type.arity();

        // In the swapped join, old left columns sit after the old right ones.
        let swapped_condition = condition.permute_inputs(&|i| {
            if i < left_arity {
                i + right_arity
            } else {
                i - left_arity
            }
        });
        let swapped = RelTree::new(
            RelCore::Join {
                kind: JoinKind::Inner,
                condition: swapped_condition,
            },
            right_type.concat(&left_type),
            call.default_traits(),
            vec![RelInput::Subset(right), RelInput::Subset(left)],
        );

        // Compensating projection restores the original column order.
        let mut exprs = Vec::with_capacity(left_arity + right_arity);
        for i in 0..left_arity {
            exprs.push(RexExpr::input(right_arity + i));
        }
        for i in 0..right_arity {
            exprs.push(RexExpr::input(i));
        }
        call.transform_to(RelTree::new(
            RelCore::Project { exprs },
            row_type,
            call.default_traits(),
            vec![RelInput::from(swapped)],
        ));
        Ok(())
    }
}
