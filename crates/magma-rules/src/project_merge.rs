//! # Project Merge
//!
//! `Project(Project(x))` collapses into a single projection by substituting
//! the lower projection's expressions into the upper one's input
//! references.

use crate::is_logical;
use magma_core::error::OptError;
use magma_core::rel::{RelCore, RelInput, RelKind, RelTree};
use magma_core::rule::{Rule, RuleCall, RuleOperand};

/// Collapses stacked projections.
pub struct ProjectMergeRule;

impl Rule for ProjectMergeRule {
    fn name(&self) -> &str {
        "ProjectMerge"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::of(
            RelKind::Project,
            vec![
                RuleOperand::of(RelKind::Project, vec![RuleOperand::any()])
                    .with_predicate(is_logical),
            ],
        )
        .with_predicate(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let top = call.rel(0);
        let row_type = top.row_type.clone();
        let RelCore::Project { exprs: top_exprs } = &top.core else {
            return Ok(());
        };
        let RelCore::Project { exprs: bottom_exprs } = &call.rel(1).core else {
            return Ok(());
        };
        let merged = top_exprs
            .iter()
            .map(|e| e.substitute_inputs(bottom_exprs))
            .collect();

        let grandchild = call.child_subset(1, 0);
        call.transform_to(RelTree::new(
            RelCore::Project { exprs: merged },
            row_type,
            call.default_traits(),
            vec![RelInput::Subset(grandchild)],
        ));
        Ok(())
    }
}
