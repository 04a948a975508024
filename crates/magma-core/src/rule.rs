//! # Rule System
//!
//! A rule is a local, equivalence-preserving rewrite: an *operand tree*
//! describing the shape of expressions it applies to, an optional `matches`
//! side condition, and an `on_match` action that produces equivalent
//! expressions via [`RuleCall::transform_to`].
//!
//! ## Operands
//!
//! Each operand constrains one node position: an optional variant, an
//! optional predicate over the concrete node, and a child policy -- `Any`
//! (terminate descent, match whatever subtree is there), an explicit list of
//! child operands, or `None` (require a leaf).
//!
//! ## Matching
//!
//! Match enumeration is event-driven and happens inside the driver: when an
//! expression is registered, every operand position accepting its variant
//! seeds a binding search that descends through child subsets' satisfying
//! members and ascends through subset parent lists. Complete bindings are
//! enqueued FIFO as rule calls and fired later by the driver loop.
//!
//! ## transform_to
//!
//! `transform_to` does not mutate the memo immediately: produced trees are
//! staged on the call and applied by the driver only after `on_match`
//! returns successfully, in call order. A failing rule therefore leaves no
//! partially-registered expressions behind. Before registration the driver
//! propagates traits from the matched root: axes the new tree does not
//! mention default to the original expression's values.

use crate::error::OptError;
use crate::metadata::Metadata;
use crate::optimizer::Optimizer;
use crate::rel::{RelInput, RelKind, RelNode, RelNodeId, RelTree, SubsetId};
use crate::traits::TraitSet;
use std::fmt;
use std::sync::Arc;

/// Predicate over a concrete node, used as an operand side condition.
pub type OperandPredicate = Arc<dyn Fn(&RelNode) -> bool + Send + Sync>;

/// Child policy of an operand.
#[derive(Clone)]
pub enum OperandChildren {
    /// Match any inputs without descending.
    Any,
    /// Match these child operands positionally (input count must be equal).
    Some(Vec<RuleOperand>),
    /// Require a leaf (no inputs).
    None,
}

/// One position in a rule's operand tree.
#[derive(Clone)]
pub struct RuleOperand {
    /// Operator variant to accept; `None` accepts every variant.
    pub kind: Option<RelKind>,
    pub(crate) predicate: Option<OperandPredicate>,
    pub children: OperandChildren,
}

impl RuleOperand {
    /// Operand accepting `kind` with explicit child operands.
    pub fn of(kind: RelKind, children: Vec<RuleOperand>) -> Self {
        Self {
            kind: Some(kind),
            predicate: None,
            children: OperandChildren::Some(children),
        }
    }

    /// Operand accepting `kind` with any inputs.
    pub fn any_inputs(kind: RelKind) -> Self {
        Self {
            kind: Some(kind),
            predicate: None,
            children: OperandChildren::Any,
        }
    }

    /// Operand accepting `kind` as a leaf.
    pub fn no_inputs(kind: RelKind) -> Self {
        Self {
            kind: Some(kind),
            predicate: None,
            children: OperandChildren::None,
        }
    }

    /// Wildcard operand: any variant, any inputs. As a child operand this
    /// terminates descent.
    pub fn any() -> Self {
        Self {
            kind: None,
            predicate: None,
            children: OperandChildren::Any,
        }
    }

    /// Attach a side condition over the concrete node.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&RelNode) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Does this operand accept the node itself (variant, predicate, input
    /// count)? Child operands are checked separately during binding.
    pub fn matches_node(&self, node: &RelNode) -> bool {
        if let Some(kind) = self.kind {
            if node.kind() != kind {
                return false;
            }
        }
        if let Some(pred) = &self.predicate {
            if !pred(node) {
                return false;
            }
        }
        match &self.children {
            OperandChildren::Any => true,
            OperandChildren::Some(children) => node.inputs.len() == children.len(),
            OperandChildren::None => node.inputs.is_empty(),
        }
    }
}

impl fmt::Debug for RuleOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleOperand")
            .field("kind", &self.kind)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A transformation or implementation rule.
pub trait Rule: Send + Sync {
    /// Unique name of this rule, used in diagnostics and exclusion filters.
    fn name(&self) -> &str;

    /// The operand tree this rule matches against.
    fn operand(&self) -> RuleOperand;

    /// Side condition over a complete binding; default accepts.
    fn matches(&self, call: &RuleCall<'_>) -> bool {
        let _ = call;
        true
    }

    /// The rule action: inspect the binding, produce equivalent expressions
    /// via `call.transform_to`.
    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<(), OptError>;
}

/// Flattened operand, pre-order, with parent links; built once per rule at
/// registration so match enumeration never re-walks the operand tree.
pub(crate) struct FlatOperand {
    pub kind: Option<RelKind>,
    pub predicate: Option<OperandPredicate>,
    pub parent: Option<usize>,
    pub ordinal_in_parent: usize,
    pub children: FlatChildren,
}

pub(crate) enum FlatChildren {
    Any,
    Indices(Vec<usize>),
    None,
}

impl FlatOperand {
    pub fn matches_node(&self, node: &RelNode) -> bool {
        if let Some(kind) = self.kind {
            if node.kind() != kind {
                return false;
            }
        }
        if let Some(pred) = &self.predicate {
            if !pred(node) {
                return false;
            }
        }
        match &self.children {
            FlatChildren::Any => true,
            FlatChildren::Indices(children) => node.inputs.len() == children.len(),
            FlatChildren::None => node.inputs.is_empty(),
        }
    }
}

/// A registered rule with its flattened operands and per-seed solve orders.
pub(crate) struct FlatRule {
    pub rule: Arc<dyn Rule>,
    pub operands: Vec<FlatOperand>,
    /// For each operand position, the order in which the remaining operands
    /// are bound when a match is seeded there: the position itself, then its
    /// ancestor chain, then the rest in pre-order.
    pub solve_orders: Vec<Vec<usize>>,
    pub active: bool,
}

pub(crate) fn flatten_rule(rule: Arc<dyn Rule>) -> FlatRule {
    let mut operands = Vec::new();
    flatten_operand(rule.operand(), None, 0, &mut operands);

    let count = operands.len();
    let mut solve_orders = Vec::with_capacity(count);
    for seed in 0..count {
        let mut order = vec![seed];
        let mut cur = seed;
        while let Some(parent) = operands[cur].parent {
            order.push(parent);
            cur = parent;
        }
        for pos in 0..count {
            if !order.contains(&pos) {
                order.push(pos);
            }
        }
        solve_orders.push(order);
    }

    FlatRule {
        rule,
        operands,
        solve_orders,
        active: true,
    }
}

fn flatten_operand(
    operand: RuleOperand,
    parent: Option<usize>,
    ordinal_in_parent: usize,
    out: &mut Vec<FlatOperand>,
) -> usize {
    let index = out.len();
    out.push(FlatOperand {
        kind: operand.kind,
        predicate: operand.predicate,
        parent,
        ordinal_in_parent,
        children: FlatChildren::Any,
    });
    let children = match operand.children {
        OperandChildren::Any => FlatChildren::Any,
        OperandChildren::None => FlatChildren::None,
        OperandChildren::Some(children) => {
            let mut indices = Vec::with_capacity(children.len());
            for (ordinal, child) in children.into_iter().enumerate() {
                indices.push(flatten_operand(child, Some(index), ordinal, out));
            }
            FlatChildren::Indices(indices)
        }
    };
    out[index].children = children;
    index
}

/// A staged `transform_to` invocation, applied by the driver after the rule
/// action succeeds.
pub(crate) struct StagedTransform {
    pub tree: RelTree,
    pub equivalences: Vec<(RelTree, RelNodeId)>,
}

/// The binding a rule fires against, plus the session facilities the rule
/// action needs.
pub struct RuleCall<'a> {
    pub(crate) opt: &'a mut Optimizer,
    pub(crate) rule_name: String,
    pub(crate) rels: Vec<RelNodeId>,
    pub(crate) staged: Vec<StagedTransform>,
}

impl<'a> RuleCall<'a> {
    /// The expression bound at operand position `i` (0 is the root operand).
    pub fn rel(&self, i: usize) -> &RelNode {
        self.opt.memo().node(self.rels[i])
    }

    /// All bound expression ids, in operand order.
    pub fn rels(&self) -> &[RelNodeId] {
        &self.rels
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// Read access to the session for memo inspection.
    pub fn optimizer(&self) -> &Optimizer {
        &*self.opt
    }

    /// Metadata view over the current memo state.
    pub fn metadata(&self) -> Metadata<'_> {
        self.opt.metadata()
    }

    /// The session's default (all-axes-default) trait set.
    pub fn default_traits(&self) -> TraitSet {
        self.opt.default_traits()
    }

    /// Canonical input subset `input` of the expression bound at `rel_index`.
    pub fn child_subset(&self, rel_index: usize, input: usize) -> SubsetId {
        let subset = self.rel(rel_index).inputs[input];
        self.opt.memo().canonical_subset(subset)
    }

    /// Request the given traits on a subset: returns the subset with those
    /// traits in the same set, creating it (seeded with an abstract
    /// converter) if it does not yet exist.
    pub fn convert(&mut self, input: SubsetId, to: &TraitSet) -> Result<RelInput, OptError> {
        Ok(RelInput::Subset(self.opt.change_subset_traits(input, to)?))
    }

    /// Stage an expression equivalent to the matched root. Applied after
    /// `on_match` succeeds.
    pub fn transform_to(&mut self, tree: RelTree) {
        self.transform_to_with_equiv(tree, Vec::new());
    }

    /// Stage an equivalent expression along with extra equivalences
    /// (`tree` ≡ existing expression) to register first.
    pub fn transform_to_with_equiv(
        &mut self,
        tree: RelTree,
        equivalences: Vec<(RelTree, RelNodeId)>,
    ) {
        self.staged.push(StagedTransform {
            tree,
            equivalences,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::RelKind;

    #[test]
    fn test_flatten_preorder_and_solve_orders() {
        // Filter(Join(any, any))
        let operand = RuleOperand::of(
            RelKind::Filter,
            vec![RuleOperand::of(
                RelKind::Join,
                vec![RuleOperand::any(), RuleOperand::any()],
            )],
        );
        struct Dummy(RuleOperand);
        impl Rule for Dummy {
            fn name(&self) -> &str {
                "Dummy"
            }
            fn operand(&self) -> RuleOperand {
                self.0.clone()
            }
            fn on_match(&self, _: &mut RuleCall<'_>) -> Result<(), OptError> {
                Ok(())
            }
        }
        let flat = flatten_rule(Arc::new(Dummy(operand)));
        assert_eq!(flat.operands.len(), 4);
        assert_eq!(flat.operands[0].kind, Some(RelKind::Filter));
        assert_eq!(flat.operands[1].kind, Some(RelKind::Join));
        assert_eq!(flat.operands[1].parent, Some(0));
        assert_eq!(flat.operands[2].parent, Some(1));
        assert_eq!(flat.operands[3].ordinal_in_parent, 1);

        // Seeding at the join ascends to the filter before descending.
        assert_eq!(flat.solve_orders[1], vec![1, 0, 2, 3]);
        assert_eq!(flat.solve_orders[0], vec![0, 1, 2, 3]);
    }
}
