//! # Converter Expansion
//!
//! `change_traits` on a subset whose trait set does not yet exist in a set
//! materializes an *abstract converter*: a synthetic expression that promises
//! its input subset under the target trait set but has no execution
//! strategy. [`ExpandConversionRule`] fires on abstract converters and chains
//! the per-axis enforcers -- for every axis whose source value does not
//! satisfy the target, it asks the axis to insert its enforcer (a `Sort` for
//! collation). The fully-chained enforcer tree is registered as an ordinary
//! equivalent member of the converter's set.
//!
//! When some axis cannot convert (convention has no built-in bridge), the
//! abstract converter is left in place but pruned: its importance drops to
//! zero and the failure is recorded on the subset so extraction can report
//! the infeasible axis instead of a bare "no plan".

use crate::error::OptError;
use crate::memo::FailedConversion;
use crate::rel::{RelInput, RelKind};
use crate::rule::{Rule, RuleCall, RuleOperand};
use tracing::debug;

/// Expands abstract converters into concrete per-axis enforcers.
pub struct ExpandConversionRule;

impl Rule for ExpandConversionRule {
    fn name(&self) -> &str {
        "ExpandConversion"
    }

    fn operand(&self) -> RuleOperand {
        RuleOperand::any_inputs(RelKind::Converter)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError> {
        let converter = call.rel(0);
        let converter_id = converter.id;
        let target = converter.traits.clone();
        let row_type = converter.row_type.clone();
        let source = call.child_subset(0, 0);
        let source_traits = call.optimizer().memo().subset(source).traits.clone();

        let mut current = RelInput::Subset(source);
        let mut current_traits = source_traits;

        for required in target.values() {
            let axis = required.axis();
            let provided = current_traits
                .get(axis)
                .cloned()
                .unwrap_or_else(|| axis.default_value());
            if axis.satisfies(&provided, required) {
                continue;
            }
            match axis.convert(current, &current_traits, &row_type, required) {
                Some(enforcer) => {
                    current_traits = enforcer.traits.clone();
                    current = RelInput::Node(Box::new(enforcer));
                }
                None => {
                    debug!(
                        "abstract converter {} infeasible: {} {} -> {}",
                        converter_id,
                        axis.name(),
                        provided,
                        required
                    );
                    let subset = call.optimizer().memo().subset_of(converter_id);
                    call.opt.mark_conversion_infeasible(
                        converter_id,
                        subset,
                        FailedConversion {
                            axis: axis.name(),
                            from: provided.to_string(),
                            to: required.to_string(),
                        },
                    );
                    return Ok(());
                }
            }
        }

        // Only register when at least one enforcer was inserted; a converter
        // whose source already satisfies the target adds nothing.
        if let RelInput::Node(tree) = current {
            call.transform_to(*tree);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::RelKind;

    #[test]
    fn test_operand_matches_converters_only() {
        let operand = ExpandConversionRule.operand();
        assert_eq!(operand.kind, Some(RelKind::Converter));
    }
}
