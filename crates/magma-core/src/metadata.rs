//! # Metadata Framework
//!
//! Metadata kinds are capability tokens ([`MetadataKind`]); a provider maps
//! `(kind, operator variant)` to a handler function through a dispatch table
//! populated at construction time -- the exact variant entry wins over the
//! any-variant fallback. Providers chain ([`ChainedProvider`]): the first
//! provider supplying a handler for a pair answers the query.
//!
//! Results are memoized inside [`MetadataQuery`] keyed by `(kind, expression
//! id, packed arguments)` and stamped with the memo timestamp at computation
//! time; a stamp mismatch means the memo changed and the entry is
//! recomputed. Unknown results (`None`) are never cached.
//!
//! Handlers receive a [`Metadata`] view and may issue further metadata
//! queries re-entrantly; the cache's interior mutability is released before
//! any handler runs.
//!
//! Arguments and results are typed tagged-unions ([`MdArgs`], [`MdValue`]);
//! the typed accessors on [`Metadata`] do the packing and unpacking so
//! callers never see the unions.

use crate::catalog::Catalog;
use crate::cost::{Cost, CostModel};
use crate::memo::Memo;
use crate::rel::{RelKind, RelNode, RelNodeId, SubsetId};
use crate::scalar::RexExpr;
use crate::traits::RelCollation;
use crate::types::TableRef;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability tokens identifying metadata kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    RowCount,
    MaxRowCount,
    CumulativeCost,
    Selectivity,
    DistinctRowCount,
    UniqueKeys,
    ColumnsUnique,
    ColumnOrigins,
    Collations,
    Predicates,
    AverageRowSize,
    AverageColumnSizes,
    Memory,
    CumulativeMemoryWithinPhase,
    SplitCount,
    PhaseTransition,
}

/// Packed handler arguments; part of the cache key, so `None`-valued
/// arguments are represented explicitly rather than elided.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MdArgs {
    None,
    Predicate(Option<RexExpr>),
    Keys(Vec<usize>),
    KeysPredicate(Vec<usize>, Option<RexExpr>),
    Column(usize),
}

/// One origin of an output column: a base table column, with `derived` set
/// when the value passed through a non-identity computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnOrigin {
    pub table: TableRef,
    pub column: usize,
    pub derived: bool,
}

/// Predicates known to hold on an expression's output, plus predicates
/// inferred for the left/right inputs of a join.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredicateList {
    pub pulled_up: Vec<RexExpr>,
    pub left_inferred: Vec<RexExpr>,
    pub right_inferred: Vec<RexExpr>,
}

/// Packed handler results.
#[derive(Debug, Clone, PartialEq)]
pub enum MdValue {
    Double(f64),
    Bool(bool),
    Cost(Cost),
    Keys(Vec<Vec<usize>>),
    Origins(Vec<ColumnOrigin>),
    Collations(Vec<RelCollation>),
    Predicates(PredicateList),
    Sizes(Vec<f64>),
}

/// A metadata handler: answers one kind for one expression, or `None` for
/// "unknown".
pub type MdHandler =
    Arc<dyn Fn(&Metadata<'_>, &RelNode, &MdArgs) -> Option<MdValue> + Send + Sync>;

/// Source of metadata handlers, dispatched on `(kind, variant)`.
pub trait MetadataProvider: Send + Sync {
    /// Handler for the given kind and the given operator variant, or `None`
    /// if this provider has no method for the pair.
    fn handler(&self, kind: MetadataKind, variant: RelKind) -> Option<MdHandler>;
}

/// Tries each provider in order; the first that supplies a handler wins.
pub struct ChainedProvider {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl ChainedProvider {
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self { providers }
    }
}

impl MetadataProvider for ChainedProvider {
    fn handler(&self, kind: MetadataKind, variant: RelKind) -> Option<MdHandler> {
        self.providers
            .iter()
            .find_map(|p| p.handler(kind, variant))
    }
}

struct CacheEntry {
    timestamp: u64,
    value: MdValue,
}

/// The caching query engine in front of a provider chain.
///
/// Owned by the optimization session; see the module docs for the cache
/// validity protocol.
pub struct MetadataQuery {
    provider: Arc<dyn MetadataProvider>,
    cache: RefCell<HashMap<(MetadataKind, RelNodeId, MdArgs), CacheEntry>>,
}

impl MetadataQuery {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            provider,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn query(
        &self,
        md: &Metadata<'_>,
        kind: MetadataKind,
        rel: RelNodeId,
        args: MdArgs,
    ) -> Option<MdValue> {
        let timestamp = md.memo.timestamp();
        let key = (kind, rel, args);
        if let Some(entry) = self.cache.borrow().get(&key) {
            if entry.timestamp == timestamp {
                return Some(entry.value.clone());
            }
        }
        // Cache borrow released: the handler may query re-entrantly.
        let node = md.memo.node(rel);
        let handler = self.provider.handler(kind, node.kind())?;
        let value = handler(md, node, &key.2)?;
        self.cache.borrow_mut().insert(
            key,
            CacheEntry {
                timestamp,
                value: value.clone(),
            },
        );
        Some(value)
    }
}

/// A borrowed view combining the query engine with the session state a
/// handler needs: the memo, the catalog and the cost model.
///
/// All public metadata access goes through the typed accessors here.
pub struct Metadata<'a> {
    mq: &'a MetadataQuery,
    memo: &'a Memo,
    catalog: &'a dyn Catalog,
    cost_model: &'a dyn CostModel,
}

impl<'a> Metadata<'a> {
    pub fn new(
        mq: &'a MetadataQuery,
        memo: &'a Memo,
        catalog: &'a dyn Catalog,
        cost_model: &'a dyn CostModel,
    ) -> Self {
        Self {
            mq,
            memo,
            catalog,
            cost_model,
        }
    }

    pub fn memo(&self) -> &Memo {
        self.memo
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog
    }

    pub fn cost_model(&self) -> &dyn CostModel {
        self.cost_model
    }

    /// Estimated row count, lower-bounded at 1.
    pub fn row_count(&self, rel: RelNodeId) -> f64 {
        match self.mq.query(self, MetadataKind::RowCount, rel, MdArgs::None) {
            Some(MdValue::Double(v)) => v.max(1.0),
            _ => 1.0,
        }
    }

    /// Upper bound on the row count, `+inf` when unbounded.
    pub fn max_row_count(&self, rel: RelNodeId) -> f64 {
        match self
            .mq
            .query(self, MetadataKind::MaxRowCount, rel, MdArgs::None)
        {
            Some(MdValue::Double(v)) => v,
            _ => f64::INFINITY,
        }
    }

    /// Self-cost plus the best cost of every child subset.
    pub fn cumulative_cost(&self, rel: RelNodeId) -> Cost {
        match self
            .mq
            .query(self, MetadataKind::CumulativeCost, rel, MdArgs::None)
        {
            Some(MdValue::Cost(c)) => c,
            _ => Cost::Infinite,
        }
    }

    /// Fraction of output rows satisfying `predicate`, in `[0, 1]`.
    pub fn selectivity(&self, rel: RelNodeId, predicate: Option<&RexExpr>) -> f64 {
        match self.mq.query(
            self,
            MetadataKind::Selectivity,
            rel,
            MdArgs::Predicate(predicate.cloned()),
        ) {
            Some(MdValue::Double(v)) => v.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Estimated number of distinct rows over the key columns; the empty key
    /// set yields 1.
    pub fn distinct_row_count(
        &self,
        rel: RelNodeId,
        keys: &[usize],
        predicate: Option<&RexExpr>,
    ) -> Option<f64> {
        match self.mq.query(
            self,
            MetadataKind::DistinctRowCount,
            rel,
            MdArgs::KeysPredicate(keys.to_vec(), predicate.cloned()),
        ) {
            Some(MdValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Known unique keys as sets of output ordinals; `None` when unknown.
    pub fn unique_keys(&self, rel: RelNodeId) -> Option<Vec<Vec<usize>>> {
        match self
            .mq
            .query(self, MetadataKind::UniqueKeys, rel, MdArgs::None)
        {
            Some(MdValue::Keys(k)) => Some(k),
            _ => None,
        }
    }

    /// Tri-state: are the given columns unique? Must agree with
    /// `unique_keys`: a `true` answer implies some unique key is a subset of
    /// `keys`.
    pub fn are_columns_unique(&self, rel: RelNodeId, keys: &[usize]) -> Option<bool> {
        match self.mq.query(
            self,
            MetadataKind::ColumnsUnique,
            rel,
            MdArgs::Keys(keys.to_vec()),
        ) {
            Some(MdValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    /// Origins of one output column; `None` when unknown.
    pub fn column_origins(&self, rel: RelNodeId, column: usize) -> Option<Vec<ColumnOrigin>> {
        match self.mq.query(
            self,
            MetadataKind::ColumnOrigins,
            rel,
            MdArgs::Column(column),
        ) {
            Some(MdValue::Origins(o)) => Some(o),
            _ => None,
        }
    }

    /// Collations the expression's output is known to satisfy.
    pub fn collations(&self, rel: RelNodeId) -> Vec<RelCollation> {
        match self
            .mq
            .query(self, MetadataKind::Collations, rel, MdArgs::None)
        {
            Some(MdValue::Collations(c)) => c,
            _ => Vec::new(),
        }
    }

    /// Predicates known to hold on the output, plus join-inferred ones.
    pub fn predicates(&self, rel: RelNodeId) -> PredicateList {
        match self
            .mq
            .query(self, MetadataKind::Predicates, rel, MdArgs::None)
        {
            Some(MdValue::Predicates(p)) => p,
            _ => PredicateList::default(),
        }
    }

    /// Average output row width in bytes.
    pub fn average_row_size(&self, rel: RelNodeId) -> Option<f64> {
        match self
            .mq
            .query(self, MetadataKind::AverageRowSize, rel, MdArgs::None)
        {
            Some(MdValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Average width per output column in bytes.
    pub fn average_column_sizes(&self, rel: RelNodeId) -> Option<Vec<f64>> {
        match self
            .mq
            .query(self, MetadataKind::AverageColumnSizes, rel, MdArgs::None)
        {
            Some(MdValue::Sizes(s)) => Some(s),
            _ => None,
        }
    }

    /// Expected memory use in bytes; may be unknown.
    pub fn memory(&self, rel: RelNodeId) -> Option<f64> {
        match self.mq.query(self, MetadataKind::Memory, rel, MdArgs::None) {
            Some(MdValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Memory used within the current execution phase; may be unknown.
    pub fn cumulative_memory_within_phase(&self, rel: RelNodeId) -> Option<f64> {
        match self.mq.query(
            self,
            MetadataKind::CumulativeMemoryWithinPhase,
            rel,
            MdArgs::None,
        ) {
            Some(MdValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Degree of parallelism; may be unknown.
    pub fn split_count(&self, rel: RelNodeId) -> Option<f64> {
        match self
            .mq
            .query(self, MetadataKind::SplitCount, rel, MdArgs::None)
        {
            Some(MdValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether the operator starts a new execution phase; may be unknown.
    pub fn is_phase_transition(&self, rel: RelNodeId) -> Option<bool> {
        match self
            .mq
            .query(self, MetadataKind::PhaseTransition, rel, MdArgs::None)
        {
            Some(MdValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    // Subset-level queries: logical kinds go through the set representative,
    // cost goes through the subset's best.

    /// Row count of a subset, via the set's representative member.
    pub fn subset_row_count(&self, subset: SubsetId) -> f64 {
        match self.memo.representative(subset) {
            Some(rep) => self.row_count(rep),
            None => 1.0,
        }
    }

    /// Max row count of a subset, via the set's representative member.
    pub fn subset_max_row_count(&self, subset: SubsetId) -> f64 {
        match self.memo.representative(subset) {
            Some(rep) => self.max_row_count(rep),
            None => f64::INFINITY,
        }
    }

    /// Collations of a subset, via the set's representative member.
    pub fn subset_collations(&self, subset: SubsetId) -> Vec<RelCollation> {
        match self.memo.representative(subset) {
            Some(rep) => self.collations(rep),
            None => Vec::new(),
        }
    }

    /// Best known cost of a subset; `Infinite` until a feasible member lands.
    pub fn subset_best_cost(&self, subset: SubsetId) -> Cost {
        self.memo
            .subset(self.memo.canonical_subset(subset))
            .best_cost
    }
}
