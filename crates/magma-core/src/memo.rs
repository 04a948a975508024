//! # The Memo
//!
//! The memo is a two-level structure over the arena of registered
//! expressions:
//!
//! - A [`RelSet`] is an equivalence class: every member produces the same
//!   multiset of rows, up to trait differences.
//! - A [`RelSubset`] holds the members of a set sharing one trait set, and is
//!   the unit of child reference: a registered expression's children are
//!   always subsets, so substituting a better member never rewrites parents.
//!
//! Membership in a subset is by satisfaction, not exact equality: a set
//! member belongs to every subset of its set whose trait set its own traits
//! satisfy. A physical scan sorted on `(a)` is therefore a member of both the
//! sorted-on-`(a)` subset and the unsorted subset.
//!
//! ## Registration and deduplication
//!
//! Registration computes a structural digest over `(variant payload, trait
//! set, canonical child subset ids)`. A digest hit returns the existing
//! expression without advancing the timestamp (idempotence); a miss inserts
//! the node into the target set (or a fresh one) and into the subset matching
//! its traits.
//!
//! ## Set merging
//!
//! When a rule proves two sets equivalent they are unified union-find style:
//! the older set survives, the loser keeps a forwarding pointer and is
//! treated as obsolete. Members and subset parent lists move to the
//! survivor, and every parent expression of a moved subset has its digest
//! recomputed -- structural equalities may newly hold upward, which can
//! cascade into further merges. Re-parented expressions are queued for fresh
//! rule matching.
//!
//! ## Timestamp
//!
//! A monotonically increasing counter bumped on every memo mutation
//! (registration, merge, best-cost improvement). Cached metadata carries the
//! stamp of the memo state it was computed against and is recomputed on
//! mismatch.

use crate::cost::Cost;
use crate::error::OptError;
use crate::rel::{RelCore, RelNode, RelNodeId, SetId, SubsetId};
use crate::traits::TraitSet;
use crate::types::RelRowType;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::trace;

/// An equivalence class of expressions.
#[derive(Debug)]
pub struct RelSet {
    pub id: SetId,
    /// Row type shared by every member; enforced at registration and merge.
    pub row_type: RelRowType,
    /// Subsets of this set, one per distinct trait set observed.
    pub subsets: Vec<SubsetId>,
    /// All member expressions, across subsets, in registration order.
    pub rels: Vec<RelNodeId>,
    /// Union-find forwarding pointer; `Some` marks this set obsolete.
    pub merged_into: Option<SetId>,
}

/// A recorded enforcer failure, used to report `InfeasibleConversion`
/// instead of a bare `NoPlanFound` when extraction fails at this subset.
#[derive(Debug, Clone)]
pub struct FailedConversion {
    pub axis: &'static str,
    pub from: String,
    pub to: String,
}

/// The members of a set sharing one trait set.
#[derive(Debug)]
pub struct RelSubset {
    pub id: SubsetId,
    pub set: SetId,
    pub traits: TraitSet,
    /// Cheapest known member whose traits satisfy this subset.
    pub best: Option<RelNodeId>,
    pub best_cost: Cost,
    /// Expressions that have this subset as an input.
    pub parents: Vec<RelNodeId>,
    /// Forwarding pointer installed when the owning set is merged away.
    pub merged_into: Option<SubsetId>,
    /// True when some caller demanded these traits via `change_traits`;
    /// required subsets attract abstract converters from sibling subsets.
    pub required: bool,
    pub failed_conversion: Option<FailedConversion>,
}

/// Digest for structural deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RelDigest {
    core: RelCore,
    traits: TraitSet,
    inputs: Vec<SubsetId>,
}

/// Outcome of a registration.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub rel: RelNodeId,
    pub subset: SubsetId,
    /// False when the digest matched an existing expression.
    pub new_node: bool,
}

/// The memo table. Owned by a single optimization session.
#[derive(Debug, Default)]
pub struct Memo {
    nodes: Vec<RelNode>,
    /// Home subset (exact-trait subset) per node, parallel to `nodes`.
    node_subset: Vec<SubsetId>,
    sets: Vec<RelSet>,
    subsets: Vec<RelSubset>,
    digests: HashMap<RelDigest, RelNodeId>,
    timestamp: u64,
    /// Nodes registered or re-parented since the driver last drained;
    /// each needs cost relaxation and rule-match enumeration.
    pending_rels: Vec<RelNodeId>,
    /// Subsets created or merged since the last drain; each needs its best
    /// member recomputed from the full member list.
    dirty_subsets: Vec<SubsetId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn node(&self, id: RelNodeId) -> &RelNode {
        &self.nodes[id.0 as usize]
    }

    pub fn set(&self, id: SetId) -> &RelSet {
        &self.sets[id.0 as usize]
    }

    pub fn subset(&self, id: SubsetId) -> &RelSubset {
        &self.subsets[id.0 as usize]
    }

    /// Chase merge forwarding to the surviving set.
    pub fn canonical_set(&self, id: SetId) -> SetId {
        let mut cur = id;
        while let Some(next) = self.sets[cur.0 as usize].merged_into {
            cur = next;
        }
        cur
    }

    /// Chase merge forwarding to the surviving subset.
    pub fn canonical_subset(&self, id: SubsetId) -> SubsetId {
        let mut cur = id;
        while let Some(next) = self.subsets[cur.0 as usize].merged_into {
            cur = next;
        }
        cur
    }

    /// The canonical home subset of a registered expression.
    pub fn subset_of(&self, rel: RelNodeId) -> SubsetId {
        self.canonical_subset(self.node_subset[rel.0 as usize])
    }

    /// The canonical set of a registered expression.
    pub fn set_of(&self, rel: RelNodeId) -> SetId {
        let subset = self.subset_of(rel);
        self.canonical_set(self.subsets[subset.0 as usize].set)
    }

    pub fn set_of_subset(&self, subset: SubsetId) -> SetId {
        let subset = self.canonical_subset(subset);
        self.canonical_set(self.subsets[subset.0 as usize].set)
    }

    /// Row type of the rows a subset produces (a set-level property).
    pub fn subset_row_type(&self, subset: SubsetId) -> &RelRowType {
        &self.set(self.set_of_subset(subset)).row_type
    }

    /// All members of the canonical set of `set`, in registration order.
    pub fn members(&self, set: SetId) -> Vec<RelNodeId> {
        self.set(self.canonical_set(set)).rels.clone()
    }

    /// Members of the subset: set members whose traits satisfy the subset's.
    pub fn rel_list(&self, subset: SubsetId) -> Vec<RelNodeId> {
        let subset = self.canonical_subset(subset);
        let traits = &self.subsets[subset.0 as usize].traits;
        let set = self.set_of_subset(subset);
        self.set(set)
            .rels
            .iter()
            .copied()
            .filter(|&rel| self.node(rel).traits.satisfies(traits))
            .collect()
    }

    /// Parent expressions referencing this subset as an input.
    pub fn parents_of(&self, subset: SubsetId) -> Vec<RelNodeId> {
        self.subset(self.canonical_subset(subset)).parents.clone()
    }

    /// Representative member for logical metadata queries: the first
    /// registered member of the set (normally the original logical seed).
    pub fn representative(&self, subset: SubsetId) -> Option<RelNodeId> {
        self.set(self.set_of_subset(subset)).rels.first().copied()
    }

    /// Register an expression, deduplicating by structural digest.
    ///
    /// A digest hit returns the existing expression and does not advance the
    /// timestamp; if `target_set` names a different set than the existing
    /// expression's, the two sets are merged first. A miss inserts the node
    /// into `target_set` (or a fresh set) and the subset for its traits.
    pub fn register(
        &mut self,
        core: RelCore,
        row_type: RelRowType,
        traits: TraitSet,
        inputs: Vec<SubsetId>,
        target_set: Option<SetId>,
    ) -> Result<Registration, OptError> {
        let inputs: Vec<SubsetId> = inputs
            .into_iter()
            .map(|s| self.canonical_subset(s))
            .collect();
        let digest = RelDigest {
            core: core.clone(),
            traits: traits.clone(),
            inputs: inputs.clone(),
        };

        if let Some(existing) = self.digests.get(&digest).copied() {
            if let Some(target) = target_set {
                let target = self.canonical_set(target);
                let existing_set = self.set_of(existing);
                if target != existing_set {
                    self.merge_sets(existing_set, target)?;
                }
            }
            let subset = self.subset_of(existing);
            return Ok(Registration {
                rel: existing,
                subset,
                new_node: false,
            });
        }

        let set_id = match target_set {
            Some(target) => {
                let target = self.canonical_set(target);
                if self.set(target).row_type != row_type {
                    return Err(self.invalid_state(format!(
                        "row type mismatch registering {:?} into {}: {} vs {}",
                        core.kind(),
                        target,
                        row_type,
                        self.set(target).row_type
                    )));
                }
                target
            }
            None => self.new_set(row_type.clone()),
        };

        let subset = self.get_or_create_subset(set_id, traits.clone());
        let id = RelNodeId(self.nodes.len() as u32);
        self.nodes.push(RelNode {
            id,
            core,
            row_type,
            traits,
            inputs: inputs.clone(),
        });
        self.node_subset.push(subset);
        self.sets[set_id.0 as usize].rels.push(id);
        for input in inputs {
            let parents = &mut self.subsets[input.0 as usize].parents;
            if !parents.contains(&id) {
                parents.push(id);
            }
        }
        self.digests.insert(digest, id);
        self.timestamp += 1;
        self.pending_rels.push(id);
        trace!("registered {} into {} ({})", id, set_id, subset);

        Ok(Registration {
            rel: id,
            subset,
            new_node: true,
        })
    }

    fn new_set(&mut self, row_type: RelRowType) -> SetId {
        let id = SetId(self.sets.len() as u32);
        self.sets.push(RelSet {
            id,
            row_type,
            subsets: Vec::new(),
            rels: Vec::new(),
            merged_into: None,
        });
        id
    }

    /// Find or create the subset of `set` with exactly these traits. New
    /// subsets are queued for best-cost recomputation.
    pub fn get_or_create_subset(&mut self, set: SetId, traits: TraitSet) -> SubsetId {
        let set = self.canonical_set(set);
        if let Some(existing) = self
            .sets[set.0 as usize]
            .subsets
            .iter()
            .copied()
            .find(|&s| self.subsets[s.0 as usize].traits == traits)
        {
            return existing;
        }
        let id = SubsetId(self.subsets.len() as u32);
        self.subsets.push(RelSubset {
            id,
            set,
            traits,
            best: None,
            best_cost: Cost::Infinite,
            parents: Vec::new(),
            merged_into: None,
            required: false,
            failed_conversion: None,
        });
        self.sets[set.0 as usize].subsets.push(id);
        self.dirty_subsets.push(id);
        id
    }

    /// Look up an expression by structure without registering it.
    pub fn lookup(
        &self,
        core: &RelCore,
        traits: &TraitSet,
        inputs: &[SubsetId],
    ) -> Option<RelNodeId> {
        let digest = RelDigest {
            core: core.clone(),
            traits: traits.clone(),
            inputs: inputs.iter().map(|&s| self.canonical_subset(s)).collect(),
        };
        self.digests.get(&digest).copied()
    }

    /// Find the subset of `set` with exactly these traits, if present.
    pub fn find_subset(&self, set: SetId, traits: &TraitSet) -> Option<SubsetId> {
        let set = self.canonical_set(set);
        self.set(set)
            .subsets
            .iter()
            .copied()
            .find(|&s| &self.subsets[s.0 as usize].traits == traits)
    }

    /// Unify two equivalence sets. The older set survives; the loser is
    /// marked obsolete and forwards to it. Parents of moved subsets get
    /// their digests recomputed, which may cascade into further merges.
    pub fn merge_sets(&mut self, a: SetId, b: SetId) -> Result<SetId, OptError> {
        let mut pairs = vec![(a, b)];
        let mut survivor_out = self.canonical_set(a);

        while let Some((a, b)) = pairs.pop() {
            let a = self.canonical_set(a);
            let b = self.canonical_set(b);
            if a == b {
                continue;
            }
            let (survivor, loser) = if a.0 <= b.0 { (a, b) } else { (b, a) };
            survivor_out = survivor;
            trace!("merging {} into {}", loser, survivor);

            if self.sets[survivor.0 as usize].row_type != self.sets[loser.0 as usize].row_type {
                return Err(self.invalid_state(format!(
                    "row type mismatch merging {} into {}",
                    loser, survivor
                )));
            }

            self.sets[loser.0 as usize].merged_into = Some(survivor);
            let loser_rels = std::mem::take(&mut self.sets[loser.0 as usize].rels);
            let loser_subsets = std::mem::take(&mut self.sets[loser.0 as usize].subsets);

            self.sets[survivor.0 as usize]
                .rels
                .extend(loser_rels.iter().copied());

            let mut affected_parents: Vec<RelNodeId> = Vec::new();
            for ls in loser_subsets {
                let traits = self.subsets[ls.0 as usize].traits.clone();
                let target = self.get_or_create_subset(survivor, traits);
                self.subsets[ls.0 as usize].merged_into = Some(target);
                let parents = std::mem::take(&mut self.subsets[ls.0 as usize].parents);
                if self.subsets[ls.0 as usize].required {
                    self.subsets[target.0 as usize].required = true;
                }
                if let Some(failed) = self.subsets[ls.0 as usize].failed_conversion.take() {
                    self.subsets[target.0 as usize]
                        .failed_conversion
                        .get_or_insert(failed);
                }
                for p in parents {
                    if !self.subsets[target.0 as usize].parents.contains(&p) {
                        self.subsets[target.0 as usize].parents.push(p);
                    }
                    affected_parents.push(p);
                }
                self.dirty_subsets.push(target);
            }

            // Re-home moved members so stale-set checks pass after the merge.
            for rel in &loser_rels {
                let home = self.node_subset[rel.0 as usize];
                self.node_subset[rel.0 as usize] = self.canonical_subset(home);
            }

            // Every surviving subset may have gained satisfying members;
            // re-derive them all.
            let survivor_subsets = self.sets[survivor.0 as usize].subsets.clone();
            self.dirty_subsets.extend(survivor_subsets);

            // Structural equalities may newly hold upward: recompute parent
            // digests against canonical children, merging on collision, and
            // re-enqueue the parents for rule matching.
            for p in affected_parents {
                let digest = self.digest_of(p);
                match self.digests.get(&digest).copied() {
                    Some(q) if q != p => {
                        let ps = self.set_of(p);
                        let qs = self.set_of(q);
                        if ps != qs {
                            pairs.push((ps, qs));
                        }
                    }
                    Some(_) => {}
                    None => {
                        self.digests.insert(digest, p);
                    }
                }
                self.pending_rels.push(p);
            }

            self.timestamp += 1;
        }

        Ok(survivor_out)
    }

    fn digest_of(&self, rel: RelNodeId) -> RelDigest {
        let node = self.node(rel);
        RelDigest {
            core: node.core.clone(),
            traits: node.traits.clone(),
            inputs: node
                .inputs
                .iter()
                .map(|&s| self.canonical_subset(s))
                .collect(),
        }
    }

    /// Record an improved best member for a subset. Bumps the timestamp so
    /// cached cumulative costs upstream are recomputed.
    pub fn set_subset_best(&mut self, subset: SubsetId, rel: RelNodeId, cost: Cost) {
        let subset = self.canonical_subset(subset);
        let s = &mut self.subsets[subset.0 as usize];
        s.best = Some(rel);
        s.best_cost = cost;
        self.timestamp += 1;
    }

    /// Mark a subset as demanded by `change_traits`.
    pub fn mark_required(&mut self, subset: SubsetId) {
        let subset = self.canonical_subset(subset);
        self.subsets[subset.0 as usize].required = true;
    }

    /// Required sibling subsets of `subset` within its set.
    pub fn required_siblings(&self, subset: SubsetId) -> Vec<SubsetId> {
        let subset = self.canonical_subset(subset);
        let set = self.set_of_subset(subset);
        self.set(set)
            .subsets
            .iter()
            .copied()
            .filter(|&s| s != subset && self.subsets[s.0 as usize].required)
            .collect()
    }

    pub fn record_failed_conversion(&mut self, subset: SubsetId, failed: FailedConversion) {
        let subset = self.canonical_subset(subset);
        self.subsets[subset.0 as usize]
            .failed_conversion
            .get_or_insert(failed);
    }

    /// Drain the queue of expressions awaiting cost relaxation and rule
    /// matching.
    pub fn take_pending_rels(&mut self) -> Vec<RelNodeId> {
        std::mem::take(&mut self.pending_rels)
    }

    /// Drain the queue of subsets awaiting best-cost recomputation.
    pub fn take_dirty_subsets(&mut self) -> Vec<SubsetId> {
        std::mem::take(&mut self.dirty_subsets)
    }

    fn invalid_state(&self, reason: String) -> OptError {
        OptError::InvalidState(format!("{}\n{}", reason, self.dump()))
    }

    /// Diagnostic dump of every set, subset and member.
    pub fn dump(&self) -> String {
        let mut out = String::from("--- memo dump ---\n");
        for set in &self.sets {
            if set.merged_into.is_some() {
                let _ = writeln!(
                    out,
                    "{} (obsolete -> {})",
                    set.id,
                    self.canonical_set(set.id)
                );
                continue;
            }
            let _ = writeln!(out, "{} rows={}", set.id, set.row_type);
            for &subset_id in &set.subsets {
                let subset = self.subset(subset_id);
                let _ = writeln!(
                    out,
                    "  {} {} best={:?} cost={}",
                    subset.id, subset.traits, subset.best, subset.best_cost
                );
            }
            for &rel in &set.rels {
                let node = self.node(rel);
                let inputs: Vec<String> =
                    node.inputs.iter().map(|i| i.to_string()).collect();
                let _ = writeln!(
                    out,
                    "  {} {} {} [{}]",
                    rel,
                    node.kind(),
                    node.traits,
                    inputs.join(", ")
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::RelCore;
    use crate::scalar::RexExpr;
    use crate::types::{RelField, RelRowType, SqlType, TableRef};

    fn row_type() -> RelRowType {
        RelRowType::new(vec![RelField::new("a", SqlType::Integer, false)])
    }

    fn scan(name: &str) -> RelCore {
        RelCore::TableScan {
            table: TableRef::new("s", name),
        }
    }

    #[test]
    fn test_register_deduplicates_and_is_idempotent() {
        let mut memo = Memo::new();
        let first = memo
            .register(scan("t"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        assert!(first.new_node);
        let ts = memo.timestamp();

        let second = memo
            .register(scan("t"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        assert!(!second.new_node);
        assert_eq!(first.rel, second.rel);
        assert_eq!(first.subset, second.subset);
        assert_eq!(memo.timestamp(), ts, "re-registration must not advance time");
    }

    #[test]
    fn test_distinct_payloads_get_distinct_sets() {
        let mut memo = Memo::new();
        let a = memo
            .register(scan("a"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        let b = memo
            .register(scan("b"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        assert_ne!(a.rel, b.rel);
        assert_ne!(memo.set_of(a.rel), memo.set_of(b.rel));
    }

    #[test]
    fn test_merge_collapses_equal_parents() {
        let mut memo = Memo::new();
        let a = memo
            .register(scan("a"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        let b = memo
            .register(scan("b"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();

        let filter = RelCore::Filter {
            predicate: RexExpr::eq(RexExpr::input(0), RexExpr::int(1)),
        };
        let fa = memo
            .register(filter.clone(), row_type(), TraitSet::empty(), vec![a.subset], None)
            .unwrap();
        let fb = memo
            .register(filter, row_type(), TraitSet::empty(), vec![b.subset], None)
            .unwrap();
        assert_ne!(memo.set_of(fa.rel), memo.set_of(fb.rel));

        let sa = memo.set_of(a.rel);
        let sb = memo.set_of(b.rel);
        memo.merge_sets(sa, sb).unwrap();

        // The scans now share a set, and the structurally equal filters
        // above them must have cascaded into one set as well.
        assert_eq!(memo.set_of(a.rel), memo.set_of(b.rel));
        assert_eq!(memo.set_of(fa.rel), memo.set_of(fb.rel));
        assert_eq!(memo.canonical_subset(b.subset), memo.canonical_subset(a.subset));
    }

    #[test]
    fn test_row_type_mismatch_is_invalid_state() {
        let mut memo = Memo::new();
        let a = memo
            .register(scan("a"), row_type(), TraitSet::empty(), vec![], None)
            .unwrap();
        let other = RelRowType::new(vec![RelField::new("x", SqlType::Varchar, true)]);
        let err = memo
            .register(scan("b"), other, TraitSet::empty(), vec![], Some(memo.set_of(a.rel)))
            .unwrap_err();
        assert!(matches!(err, OptError::InvalidState(_)));
    }
}
