//! # Optimizer Driver
//!
//! The [`Optimizer`] is the per-session container: it owns the memo, the
//! trait registry, the rule queue, the metadata cache, the importance map and
//! the expression id counter. Sessions share nothing; run one per thread.
//!
//! ## Control flow
//!
//! `optimize` registers the root tree, requests the target trait set on the
//! root's set (creating the target subset and its abstract converters), and
//! then drives the queue: registration enqueues rule matches, firing a match
//! may register new expressions, which enqueue further matches, until the
//! queue drains or the budget is exhausted. Extraction then walks the target
//! subset choosing the best member at every level.
//!
//! ## Cost maintenance
//!
//! Every registration relaxes best costs: the new expression's cumulative
//! cost is offered to every subset of its set whose traits it satisfies, and
//! improvements cascade to parent subsets (shortest-path relaxation over the
//! memo graph). Set merges re-derive every subset of the surviving set from
//! scratch before relaxing upward.
//!
//! ## Cancellation
//!
//! The driver polls a cooperative [`CancelToken`] between rule calls. On
//! cancellation it stops firing and returns the best plan found so far, or
//! `Cancelled` if the target subset has no feasible plan yet.

use crate::catalog::Catalog;
use crate::cost::{Cost, CostModel};
use crate::error::OptError;
use crate::memo::{FailedConversion, Memo, Registration};
use crate::metadata::{Metadata, MetadataProvider, MetadataQuery};
use crate::providers::DefaultMetadataProvider;
use crate::rel::{RelCore, RelInput, RelKind, RelNodeId, RelPlan, RelTree, SetId, SubsetId};
use crate::rule::{flatten_rule, FlatChildren, FlatRule, Rule, RuleCall};
use crate::traits::{TraitAxis, TraitRegistry, TraitSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Budget knobs for a session.
///
/// `max_rule_calls` bounds total rule firings across the session and
/// `max_fires_per_rule` caps any single rule, preventing runaway rule sets;
/// both are safety valves rather than tuning parameters.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Upper bound on total rule calls fired.
    pub max_rule_calls: usize,
    /// Upper bound on firings of any single rule.
    pub max_fires_per_rule: usize,
    /// Continue past rule errors instead of aborting the session.
    pub continue_on_rule_error: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_rule_calls: 100_000,
            max_fires_per_rule: 10_000,
            continue_on_rule_error: false,
        }
    }
}

/// Cooperative cancellation flag, polled between rule calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Synchronous tracing hooks invoked during optimization.
pub trait OptimizerListener {
    /// A rule call passed validation and is about to run.
    fn rule_attempted(&mut self, rule: &str, rels: &[RelNodeId]) {
        let _ = (rule, rels);
    }

    /// A rule produced (or re-found) an equivalent expression.
    fn rule_production(&mut self, rule: &str, rel: RelNodeId) {
        let _ = (rule, rel);
    }

    /// A new expression joined an equivalence set.
    fn rel_equivalence_found(&mut self, rel: RelNodeId, set: SetId) {
        let _ = (rel, set);
    }

    /// A produced expression was dropped: it deduplicated to an existing
    /// member or was pruned as infeasible.
    fn rel_discarded(&mut self, rel: RelNodeId) {
        let _ = rel;
    }
}

/// The winning plan and its cost at the target subset.
#[derive(Debug, Clone)]
pub struct BestPlan {
    pub plan: RelPlan,
    pub cost: Cost,
}

struct QueuedCall {
    rule_index: usize,
    rels: Vec<RelNodeId>,
    /// Sets of the bound expressions at enqueue time; a merged (obsolete)
    /// stamp invalidates the call.
    sets: Vec<SetId>,
}

/// The optimization session and driver.
pub struct Optimizer {
    memo: Memo,
    traits: TraitRegistry,
    rules: Vec<FlatRule>,
    fires: Vec<usize>,
    /// Operand positions by accepted variant: `(rule index, operand pos)`.
    kind_index: HashMap<RelKind, Vec<(usize, usize)>>,
    /// Operand positions accepting any variant.
    wildcard_index: Vec<(usize, usize)>,
    excluded: Option<Box<dyn Fn(&str) -> bool + Send + Sync>>,
    queue: VecDeque<QueuedCall>,
    seen_calls: HashSet<(usize, Vec<RelNodeId>)>,
    importance: HashMap<RelNodeId, f64>,
    calls_fired: usize,
    mq: MetadataQuery,
    cost_model: Arc<dyn CostModel>,
    catalog: Arc<dyn Catalog>,
    listeners: Vec<Box<dyn OptimizerListener>>,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(catalog: Arc<dyn Catalog>, cost_model: Arc<dyn CostModel>) -> Self {
        Self::with_config(catalog, cost_model, OptimizerConfig::default())
    }

    pub fn with_config(
        catalog: Arc<dyn Catalog>,
        cost_model: Arc<dyn CostModel>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            memo: Memo::new(),
            traits: TraitRegistry::new(),
            rules: Vec::new(),
            fires: Vec::new(),
            kind_index: HashMap::new(),
            wildcard_index: Vec::new(),
            excluded: None,
            queue: VecDeque::new(),
            seen_calls: HashSet::new(),
            importance: HashMap::new(),
            calls_fired: 0,
            mq: MetadataQuery::new(Arc::new(DefaultMetadataProvider::new())),
            cost_model,
            catalog,
            listeners: Vec::new(),
            config,
        }
    }

    // --- session setup -----------------------------------------------------

    pub fn add_trait_axis(&mut self, axis: TraitAxis) {
        self.traits.add_axis(axis);
    }

    pub fn trait_registry(&self) -> &TraitRegistry {
        &self.traits
    }

    /// The session's all-defaults trait set.
    pub fn default_traits(&self) -> TraitSet {
        self.traits.default_traits()
    }

    /// Register a rule; its operands are flattened and indexed by variant so
    /// match enumeration on a new expression is proportional to the rules
    /// that can actually accept it. Expressions already in the memo are
    /// matched against the new rule immediately.
    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        let rule_index = self.rules.len();
        let flat = flatten_rule(rule);
        for (pos, operand) in flat.operands.iter().enumerate() {
            match operand.kind {
                Some(kind) => self
                    .kind_index
                    .entry(kind)
                    .or_default()
                    .push((rule_index, pos)),
                None => self.wildcard_index.push((rule_index, pos)),
            }
        }
        self.rules.push(flat);
        self.fires.push(0);

        for id in 0..self.memo.num_nodes() {
            self.enumerate_rule(rule_index, RelNodeId(id as u32));
        }
    }

    /// Deactivate a rule by name. Queued calls for it are skipped.
    pub fn remove_rule(&mut self, name: &str) {
        for rule in &mut self.rules {
            if rule.rule.name() == name {
                rule.active = false;
            }
        }
    }

    /// Install an exclusion filter; matching rules are skipped at fire time.
    pub fn set_rule_excluded(&mut self, predicate: Box<dyn Fn(&str) -> bool + Send + Sync>) {
        self.excluded = Some(predicate);
    }

    pub fn add_listener(&mut self, listener: Box<dyn OptimizerListener>) {
        self.listeners.push(listener);
    }

    /// Swap the metadata provider chain; the cache is reset.
    pub fn set_metadata_provider(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.mq = MetadataQuery::new(provider);
    }

    // --- introspection -----------------------------------------------------

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// Metadata view over the current memo state.
    pub fn metadata(&self) -> Metadata<'_> {
        Metadata::new(
            &self.mq,
            &self.memo,
            self.catalog.as_ref(),
            self.cost_model.as_ref(),
        )
    }

    /// Importance of an expression; defaults to the seeded value.
    pub fn importance(&self, rel: RelNodeId) -> f64 {
        self.importance.get(&rel).copied().unwrap_or(1.0)
    }

    pub fn set_importance(&mut self, rel: RelNodeId, importance: f64) {
        self.importance.insert(rel, importance.max(0.0));
    }

    /// Zero an expression's importance, excluding it from further matching.
    pub fn prune(&mut self, rel: RelNodeId) {
        self.importance.insert(rel, 0.0);
        self.notify(|l| l.rel_discarded(rel));
    }

    // --- registration protocol ---------------------------------------------

    /// Register a tree, returning the subset for its (completed) traits.
    pub fn register(&mut self, tree: RelTree) -> Result<SubsetId, OptError> {
        self.ensure_registered(tree, None).map(|r| r.subset)
    }

    /// Register a tree; if `equiv_to` names an expression in a different
    /// set, the two sets are merged.
    pub fn ensure_registered(
        &mut self,
        tree: RelTree,
        equiv_to: Option<RelNodeId>,
    ) -> Result<Registration, OptError> {
        let target = equiv_to.map(|rel| self.memo.set_of(rel));
        let registration = self.register_tree(tree, target)?;
        self.drain_pending()?;
        Ok(registration)
    }

    /// The subset an already-registered tree maps to, without registering.
    /// Only trees whose inputs are all subset references can be probed.
    pub fn get_subset(&self, tree: &RelTree) -> Option<SubsetId> {
        let mut inputs = Vec::with_capacity(tree.inputs.len());
        for input in &tree.inputs {
            match input {
                RelInput::Subset(s) => inputs.push(self.memo.canonical_subset(*s)),
                RelInput::Node(_) => return None,
            }
        }
        let traits = self.traits.complete(&tree.traits);
        let rel = self.memo.lookup(&tree.core, &traits, &inputs)?;
        Some(self.memo.subset_of(rel))
    }

    /// Request `to` on the subset `rel` belongs to; creates the subset and
    /// its abstract converters when absent.
    pub fn change_traits(&mut self, rel: RelNodeId, to: &TraitSet) -> Result<SubsetId, OptError> {
        let subset = self.memo.subset_of(rel);
        let target = self.change_subset_traits(subset, to)?;
        self.drain_pending()?;
        Ok(target)
    }

    /// Like `change_traits` but starting from a subset. Does not drain the
    /// work queue, so it is safe to call from inside a rule action.
    pub fn change_subset_traits(
        &mut self,
        subset: SubsetId,
        to: &TraitSet,
    ) -> Result<SubsetId, OptError> {
        let to = self.traits.complete(to);
        let subset = self.memo.canonical_subset(subset);
        if self.memo.subset(subset).traits == to {
            return Ok(subset);
        }
        let set = self.memo.set_of_subset(subset);
        let target = self.memo.get_or_create_subset(set, to.clone());
        self.memo.mark_required(target);

        // Seed abstract converters from every sibling subset: each promises
        // this set's rows under the target traits and is later expanded into
        // concrete enforcers (or marked infeasible).
        let row_type = self.memo.set(set).row_type.clone();
        for other in self.memo.set(set).subsets.clone() {
            let other = self.memo.canonical_subset(other);
            if other == target {
                continue;
            }
            self.memo.register(
                RelCore::Converter,
                row_type.clone(),
                to.clone(),
                vec![other],
                Some(set),
            )?;
        }
        Ok(target)
    }

    fn register_tree(
        &mut self,
        tree: RelTree,
        target_set: Option<SetId>,
    ) -> Result<Registration, OptError> {
        let RelTree {
            core,
            row_type,
            traits,
            inputs,
        } = tree;
        let mut child_subsets = Vec::with_capacity(inputs.len());
        for input in inputs {
            let subset = match input {
                RelInput::Subset(s) => self.memo.canonical_subset(s),
                RelInput::Node(t) => self.register_tree(*t, None)?.subset,
            };
            child_subsets.push(subset);
        }
        let traits = self.traits.complete(&traits);
        self.memo
            .register(core, row_type, traits, child_subsets, target_set)
    }

    pub(crate) fn mark_conversion_infeasible(
        &mut self,
        converter: RelNodeId,
        subset: SubsetId,
        failed: FailedConversion,
    ) {
        self.importance.insert(converter, 0.0);
        self.memo.record_failed_conversion(subset, failed);
        self.notify(|l| l.rel_discarded(converter));
    }

    // --- cost maintenance and match enumeration ----------------------------

    /// Process everything the memo queued since the last drain: recompute
    /// best costs for new or merged subsets, relax costs from new
    /// expressions, seed importances and enumerate rule matches.
    fn drain_pending(&mut self) -> Result<(), OptError> {
        loop {
            let dirty = self.memo.take_dirty_subsets();
            let pending = self.memo.take_pending_rels();
            if dirty.is_empty() && pending.is_empty() {
                break;
            }
            for subset in dirty {
                self.seed_converters(subset)?;
                self.recompute_subset_best(subset);
            }
            for rel in pending {
                self.propagate_costs(rel);
                self.seed_importance(rel);
                self.enumerate_matches(rel);
            }
        }
        Ok(())
    }

    /// A subset that appears after a required sibling still needs a
    /// conversion path to it; seed the missing abstract converters.
    fn seed_converters(&mut self, subset: SubsetId) -> Result<(), OptError> {
        let subset = self.memo.canonical_subset(subset);
        let required = self.memo.required_siblings(subset);
        if required.is_empty() {
            return Ok(());
        }
        let set = self.memo.set_of_subset(subset);
        let row_type = self.memo.set(set).row_type.clone();
        for target in required {
            let to = self.memo.subset(target).traits.clone();
            self.memo.register(
                RelCore::Converter,
                row_type.clone(),
                to,
                vec![subset],
                Some(set),
            )?;
        }
        Ok(())
    }

    /// Derive a subset's best member from scratch by scanning the set.
    fn recompute_subset_best(&mut self, subset: SubsetId) {
        let subset = self.memo.canonical_subset(subset);
        let members = self.memo.rel_list(subset);
        let mut best: Option<(RelNodeId, Cost)> = None;
        {
            let md = self.metadata();
            for rel in members {
                let cost = md.cumulative_cost(rel);
                if cost.is_infinite() {
                    continue;
                }
                if best.as_ref().map_or(true, |(_, c)| cost < *c) {
                    best = Some((rel, cost));
                }
            }
        }
        if let Some((rel, cost)) = best {
            if cost < self.memo.subset(subset).best_cost {
                self.memo.set_subset_best(subset, rel, cost);
                trace!("{} best now {} at {}", subset, rel, cost);
                for parent in self.memo.parents_of(subset) {
                    self.propagate_costs(parent);
                }
            }
        }
    }

    /// Shortest-path relaxation: offer `start`'s cumulative cost to every
    /// satisfied subset of its set and cascade improvements to parents.
    fn propagate_costs(&mut self, start: RelNodeId) {
        let mut work = VecDeque::new();
        work.push_back(start);
        while let Some(rel) = work.pop_front() {
            let cost = self.metadata().cumulative_cost(rel);
            if cost.is_infinite() {
                continue;
            }
            let set = self.memo.set_of(rel);
            let rel_traits = self.memo.node(rel).traits.clone();
            for subset in self.memo.set(set).subsets.clone() {
                let subset = self.memo.canonical_subset(subset);
                let entry = self.memo.subset(subset);
                if rel_traits.satisfies(&entry.traits) && cost < entry.best_cost {
                    self.memo.set_subset_best(subset, rel, cost);
                    trace!("{} best now {} at {}", subset, rel, cost);
                    for parent in self.memo.parents_of(subset) {
                        work.push_back(parent);
                    }
                }
            }
        }
    }

    /// Importance is seeded from cumulative cost: cheap expressions matter
    /// more. Not-yet-costed expressions keep full importance so their rules
    /// still fire.
    fn seed_importance(&mut self, rel: RelNodeId) {
        if self.importance.contains_key(&rel) {
            return;
        }
        let cost = self.metadata().cumulative_cost(rel);
        let importance = match cost {
            Cost::Finite { rows, .. } => 1.0 / (1.0 + rows),
            _ => 1.0,
        };
        self.importance.insert(rel, importance);
    }

    /// Enqueue every rule binding that includes `rel` at some operand.
    fn enumerate_matches(&mut self, rel: RelNodeId) {
        let kind = self.memo.node(rel).kind();
        let mut candidates: Vec<(usize, usize)> = self
            .kind_index
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        candidates.extend(self.wildcard_index.iter().copied());
        for (rule_index, seed_pos) in candidates {
            self.enumerate_seeded(rule_index, seed_pos, rel);
        }
    }

    /// Enqueue bindings of one rule that include `rel` at any operand.
    fn enumerate_rule(&mut self, rule_index: usize, rel: RelNodeId) {
        for pos in 0..self.rules[rule_index].operands.len() {
            self.enumerate_seeded(rule_index, pos, rel);
        }
    }

    fn enumerate_seeded(&mut self, rule_index: usize, seed_pos: usize, rel: RelNodeId) {
        if !self.rules[rule_index].active {
            return;
        }
        let bindings = self.find_bindings(rule_index, seed_pos, rel);
        for rels in bindings {
            let key = (rule_index, rels.clone());
            if self.seen_calls.insert(key) {
                let sets = rels.iter().map(|&r| self.memo.set_of(r)).collect();
                trace!(
                    "match {} {:?}",
                    self.rules[rule_index].rule.name(),
                    rels
                );
                self.queue.push_back(QueuedCall {
                    rule_index,
                    rels,
                    sets,
                });
            }
        }
    }

    /// All complete bindings of the rule with `rel` at `seed_pos`: descend
    /// through child subsets' satisfying members, ascend through subset
    /// parent lists, cross-checking that a bound child really sits at the
    /// operand's input position.
    fn find_bindings(
        &self,
        rule_index: usize,
        seed_pos: usize,
        rel: RelNodeId,
    ) -> Vec<Vec<RelNodeId>> {
        let flat = &self.rules[rule_index];
        if !flat.operands[seed_pos].matches_node(self.memo.node(rel)) {
            return Vec::new();
        }
        let mut bound = vec![None; flat.operands.len()];
        bound[seed_pos] = Some(rel);
        let mut out = Vec::new();
        self.match_step(flat, &flat.solve_orders[seed_pos], 1, &mut bound, &mut out);
        out
    }

    fn match_step(
        &self,
        flat: &FlatRule,
        order: &[usize],
        depth: usize,
        bound: &mut Vec<Option<RelNodeId>>,
        out: &mut Vec<Vec<RelNodeId>>,
    ) {
        if depth == order.len() {
            let rels: Option<Vec<RelNodeId>> = bound.iter().copied().collect();
            if let Some(rels) = rels {
                out.push(rels);
            }
            return;
        }
        let pos = order[depth];
        let operand = &flat.operands[pos];

        let ascending_child = match &operand.children {
            FlatChildren::Indices(children) => {
                children.iter().copied().find(|&c| bound[c].is_some())
            }
            _ => None,
        };

        if let Some(child_pos) = ascending_child {
            let Some(child_rel) = bound[child_pos] else {
                return;
            };
            let child_subset = self.memo.subset_of(child_rel);
            let child_set = self.memo.set_of(child_rel);
            let ordinal = flat.operands[child_pos].ordinal_in_parent;
            for candidate in self.memo.parents_of(child_subset) {
                let node = self.memo.node(candidate);
                if !operand.matches_node(node) {
                    continue;
                }
                // The child was *a* child of this candidate; check it is the
                // child at the operand's position.
                match node.inputs.get(ordinal) {
                    Some(&input) if self.memo.set_of_subset(input) == child_set => {}
                    _ => continue,
                }
                bound[pos] = Some(candidate);
                self.match_step(flat, order, depth + 1, bound, out);
                bound[pos] = None;
            }
        } else {
            let Some(parent_pos) = operand.parent else {
                return;
            };
            let Some(parent_rel) = bound[parent_pos] else {
                return;
            };
            let parent = self.memo.node(parent_rel);
            let Some(&input) = parent.inputs.get(operand.ordinal_in_parent) else {
                return;
            };
            for candidate in self.memo.rel_list(input) {
                if !operand.matches_node(self.memo.node(candidate)) {
                    continue;
                }
                bound[pos] = Some(candidate);
                self.match_step(flat, order, depth + 1, bound, out);
                bound[pos] = None;
            }
        }
    }

    // --- the driver loop ---------------------------------------------------

    /// Optimize: register the root, demand `required` traits on its set, run
    /// the rule queue to quiescence (or budget/cancellation), and extract
    /// the cheapest plan at the target subset.
    pub fn optimize(
        &mut self,
        root: RelTree,
        required: &TraitSet,
        cancel: &CancelToken,
    ) -> Result<BestPlan, OptError> {
        let registration = self.register_tree(root, None)?;
        let target = self.change_subset_traits(registration.subset, required)?;
        self.drain_pending()?;
        debug!(
            "optimization start: target {}, {} sets, {} exprs, {} queued calls",
            target,
            self.memo.num_sets(),
            self.memo.num_nodes(),
            self.queue.len()
        );

        let mut cancelled = false;
        loop {
            self.drain_pending()?;
            if cancel.is_cancelled() {
                cancelled = true;
                debug!("optimization cancelled after {} calls", self.calls_fired);
                break;
            }
            let Some(call) = self.queue.pop_front() else {
                break;
            };
            if self.calls_fired >= self.config.max_rule_calls {
                debug!("rule call budget exhausted");
                break;
            }
            self.fire(call)?;
        }

        let target = self.memo.canonical_subset(target);
        match self.extract(target) {
            Ok(plan) => {
                let cost = self.memo.subset(target).best_cost;
                debug!(
                    "optimization complete: cost {}, {} calls fired",
                    cost, self.calls_fired
                );
                Ok(BestPlan { plan, cost })
            }
            Err(_) if cancelled => Err(OptError::Cancelled),
            Err(e) => Err(e),
        }
    }

    fn fire(&mut self, call: QueuedCall) -> Result<(), OptError> {
        let QueuedCall {
            rule_index,
            rels,
            sets,
        } = call;
        if !self.rules[rule_index].active {
            return Ok(());
        }
        let rule = self.rules[rule_index].rule.clone();
        let name = rule.name().to_string();

        if let Some(excluded) = &self.excluded {
            if excluded(&name) {
                trace!("rule {} not fired: excluded", name);
                return Ok(());
            }
        }
        if self.fires[rule_index] >= self.config.max_fires_per_rule {
            debug!("rule {} not fired: per-rule cap reached", name);
            return Ok(());
        }

        // Re-validate the binding: a merged set makes the call stale (the
        // merge re-enumerated its expressions), and a zero-importance
        // operand prunes the call outright.
        for (i, &rel) in rels.iter().enumerate() {
            if self.memo.set(sets[i]).merged_into.is_some() {
                trace!("rule {} not fired: {} in obsolete {}", name, rel, sets[i]);
                self.seen_calls.remove(&(rule_index, rels.clone()));
                self.enumerate_matches(rels[0]);
                return Ok(());
            }
            if self
                .importance
                .get(&rel)
                .map_or(false, |&imp| imp == 0.0)
            {
                trace!("rule {} not fired: {} has importance 0", name, rel);
                return Ok(());
            }
        }

        let rels_for_listener = rels.clone();
        self.notify(|l| l.rule_attempted(&name, &rels_for_listener));
        self.calls_fired += 1;
        self.fires[rule_index] += 1;

        let mut rule_call = RuleCall {
            opt: &mut *self,
            rule_name: name.clone(),
            rels: rels.clone(),
            staged: Vec::new(),
        };
        if !rule.matches(&rule_call) {
            return Ok(());
        }
        trace!("firing {} on {:?}", name, rels);
        let result = rule.on_match(&mut rule_call);
        let staged = std::mem::take(&mut rule_call.staged);
        drop(rule_call);

        match result {
            Ok(()) => self.apply_staged(rels[0], staged, &name),
            Err(e) => {
                let wrapped = OptError::Rule {
                    rule: name,
                    source: Box::new(e),
                };
                if self.config.continue_on_rule_error {
                    warn!("{}; continuing", wrapped);
                    Ok(())
                } else {
                    Err(wrapped)
                }
            }
        }
    }

    /// Apply the registrations a successful rule call staged, in call order:
    /// propagate traits from the original root, register equivalences first,
    /// then the new expression into the original's set.
    fn apply_staged(
        &mut self,
        original: RelNodeId,
        staged: Vec<crate::rule::StagedTransform>,
        rule_name: &str,
    ) -> Result<(), OptError> {
        for transform in staged {
            let original_traits = self.memo.node(original).traits.clone();
            let original_set = self.memo.set_of(original);

            for (tree, equiv_rel) in transform.equivalences {
                let equiv_traits = self.memo.node(equiv_rel).traits.clone();
                let equiv_set = self.memo.set_of(equiv_rel);
                let tree = complete_tree(tree, &equiv_traits);
                self.register_tree(tree, Some(equiv_set))?;
            }

            let tree = complete_tree(transform.tree, &original_traits);
            let registration = self.register_tree(tree, Some(original_set))?;
            let rel = registration.rel;
            let set = self.memo.set_of(rel);
            self.notify(|l| l.rule_production(rule_name, rel));
            if registration.new_node {
                self.notify(|l| l.rel_equivalence_found(rel, set));
            } else {
                self.notify(|l| l.rel_discarded(rel));
            }
        }
        Ok(())
    }

    // --- extraction --------------------------------------------------------

    /// Walk from a subset choosing the best member at every level.
    fn extract(&self, subset: SubsetId) -> Result<RelPlan, OptError> {
        let subset = self.memo.canonical_subset(subset);
        let entry = self.memo.subset(subset);
        let best = match entry.best {
            Some(best) if !entry.best_cost.is_infinite() => best,
            _ => {
                return Err(match &entry.failed_conversion {
                    Some(failed) => OptError::InfeasibleConversion {
                        axis: failed.axis,
                        from: failed.from.clone(),
                        to: failed.to.clone(),
                    },
                    None => OptError::NoPlanFound { subset },
                });
            }
        };
        let node = self.memo.node(best);
        let mut inputs = Vec::with_capacity(node.inputs.len());
        for &child in &node.inputs {
            inputs.push(self.extract(child)?);
        }
        Ok(RelPlan {
            core: node.core.clone(),
            row_type: node.row_type.clone(),
            traits: node.traits.clone(),
            inputs,
        })
    }

    fn notify(&mut self, f: impl Fn(&mut dyn OptimizerListener)) {
        for listener in self.listeners.iter_mut() {
            f(listener.as_mut());
        }
    }
}

/// Fill trait axes the new tree does not mention from the original
/// expression's traits, recursively over unregistered children.
fn complete_tree(tree: RelTree, fallback: &TraitSet) -> RelTree {
    RelTree {
        core: tree.core,
        row_type: tree.row_type,
        traits: tree.traits.completed_from(fallback),
        inputs: tree
            .inputs
            .into_iter()
            .map(|input| match input {
                RelInput::Node(t) => RelInput::Node(Box::new(complete_tree(*t, fallback))),
                subset => subset,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::cost::DefaultCostModel;
    use crate::rel::RelCore;
    use crate::scalar::ScalarValue;
    use crate::traits::{Convention, TraitValue};
    use crate::types::{RelField, RelRowType, SqlType};

    fn values_tree() -> RelTree {
        RelTree::new(
            RelCore::Values {
                tuples: vec![vec![ScalarValue::Int64(1)], vec![ScalarValue::Int64(2)]],
            },
            RelRowType::new(vec![RelField::new("a", SqlType::BigInt, false)]),
            TraitSet::empty(),
            vec![],
        )
    }

    fn optimizer() -> Optimizer {
        let mut opt = Optimizer::new(
            Arc::new(InMemoryCatalog::new()),
            Arc::new(DefaultCostModel),
        );
        opt.add_trait_axis(TraitAxis::Convention);
        opt.add_trait_axis(TraitAxis::Collation);
        opt.add_rule(Arc::new(crate::convert::ExpandConversionRule));
        opt
    }

    #[test]
    fn test_config_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.max_rule_calls, 100_000);
        assert_eq!(config.max_fires_per_rule, 10_000);
        assert!(!config.continue_on_rule_error);
    }

    #[test]
    fn test_optimize_logical_identity() {
        let mut opt = optimizer();
        let required = opt.default_traits();
        let best = opt
            .optimize(values_tree(), &required, &CancelToken::new())
            .expect("logical identity plan");
        assert_eq!(best.plan.core.kind(), RelKind::Values);
        assert!(!best.cost.is_infinite());
    }

    #[test]
    fn test_unreachable_traits_report_infeasible_conversion() {
        let mut opt = optimizer();
        let required = opt
            .default_traits()
            .replace(TraitValue::Convention(Convention::named("PHYSICAL")));
        let err = opt
            .optimize(values_tree(), &required, &CancelToken::new())
            .unwrap_err();
        // No rule supplies a physical Values, and the convention axis has
        // no built-in bridge.
        assert!(matches!(err, OptError::InfeasibleConversion { .. }));
    }

    #[test]
    fn test_cancelled_before_any_plan() {
        let mut opt = optimizer();
        let required = opt
            .default_traits()
            .replace(TraitValue::Convention(Convention::named("PHYSICAL")));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = opt.optimize(values_tree(), &required, &cancel).unwrap_err();
        assert!(matches!(err, OptError::Cancelled));
    }

    #[test]
    fn test_cancelled_with_plan_returns_best_so_far() {
        let mut opt = optimizer();
        let required = opt.default_traits();
        let cancel = CancelToken::new();
        cancel.cancel();
        let best = opt
            .optimize(values_tree(), &required, &cancel)
            .expect("already-feasible plan survives cancellation");
        assert_eq!(best.plan.core.kind(), RelKind::Values);
    }
}
