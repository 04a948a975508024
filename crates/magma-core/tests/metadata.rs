//! Metadata derivation over EMP/DEPT fixtures: row counts, unique keys,
//! column origins, sizes, predicates, and the timestamp-based cache
//! protocol.

use magma_core::catalog::InMemoryCatalog;
use magma_core::cost::DefaultCostModel;
use magma_core::error::OptError;
use magma_core::metadata::{
    ChainedProvider, ColumnOrigin, MdArgs, MdHandler, MdValue, MetadataKind, MetadataProvider,
};
use magma_core::optimizer::Optimizer;
use magma_core::providers::{guess_selectivity, DefaultMetadataProvider};
use magma_core::rel::{AggCall, AggFunc, JoinKind, RelCore, RelInput, RelKind, RelTree};
use magma_core::scalar::RexExpr;
use magma_core::traits::TraitSet;
use magma_core::types::{RelField, RelRowType, SqlType, TableRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn emp() -> TableRef {
    TableRef::new("hr", "emp")
}

fn dept() -> TableRef {
    TableRef::new("hr", "dept")
}

fn emp_row_type() -> RelRowType {
    RelRowType::new(vec![
        RelField::new("empno", SqlType::Integer, false),
        RelField::new("ename", SqlType::Varchar, false),
        RelField::new("deptno", SqlType::Integer, false),
    ])
}

fn dept_row_type() -> RelRowType {
    RelRowType::new(vec![
        RelField::new("deptno", SqlType::Integer, false),
        RelField::new("dname", SqlType::Varchar, false),
    ])
}

fn optimizer() -> Optimizer {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(&emp(), emp_row_type(), 14.0);
    catalog.add_unique_key(&emp(), vec![0]);
    catalog.add_table(&dept(), dept_row_type(), 4.0);
    catalog.add_unique_key(&dept(), vec![0]);
    Optimizer::new(Arc::new(catalog), Arc::new(DefaultCostModel))
}

fn emp_scan() -> RelTree {
    RelTree::new(
        RelCore::TableScan { table: emp() },
        emp_row_type(),
        TraitSet::empty(),
        vec![],
    )
}

fn dept_scan() -> RelTree {
    RelTree::new(
        RelCore::TableScan { table: dept() },
        dept_row_type(),
        TraitSet::empty(),
        vec![],
    )
}

#[test]
fn test_filter_row_count_applies_equality_selectivity() {
    let mut opt = optimizer();
    let filter = RelTree::new(
        RelCore::Filter {
            predicate: RexExpr::eq(RexExpr::input(2), RexExpr::int(10)),
        },
        emp_row_type(),
        TraitSet::empty(),
        vec![RelInput::from(emp_scan())],
    );
    let reg = opt.ensure_registered(filter, None).unwrap();

    let md = opt.metadata();
    assert!((md.row_count(reg.rel) - 14.0 * 0.15).abs() < 1e-9);
    assert_eq!(md.max_row_count(reg.rel), f64::INFINITY);
}

#[test]
fn test_aggregate_group_keys_are_unique() {
    let mut opt = optimizer();
    let agg = RelTree::new(
        RelCore::Aggregate {
            group_keys: vec![2],
            calls: vec![AggCall::new(AggFunc::Count, vec![0], "cnt")],
        },
        RelRowType::new(vec![
            RelField::new("deptno", SqlType::Integer, false),
            RelField::new("cnt", SqlType::BigInt, false),
        ]),
        TraitSet::empty(),
        vec![RelInput::from(emp_scan())],
    );
    let reg = opt.ensure_registered(agg, None).unwrap();

    let md = opt.metadata();
    assert_eq!(md.unique_keys(reg.rel), Some(vec![vec![0]]));
    assert_eq!(md.are_columns_unique(reg.rel, &[0]), Some(true));
    assert_eq!(md.are_columns_unique(reg.rel, &[0, 1]), Some(true));
    assert_eq!(md.are_columns_unique(reg.rel, &[1]), Some(false));
}

#[test]
fn test_columns_unique_is_consistent_with_unique_keys() {
    let mut opt = optimizer();
    let reg = opt.ensure_registered(emp_scan(), None).unwrap();
    let md = opt.metadata();

    let unique_keys = md.unique_keys(reg.rel).expect("table keys known");
    for keys in [vec![0], vec![1], vec![0, 1], vec![1, 2], vec![0, 2]] {
        let answer = md.are_columns_unique(reg.rel, &keys);
        let implied = unique_keys
            .iter()
            .any(|uk| uk.iter().all(|c| keys.contains(c)));
        assert_eq!(answer, Some(implied), "inconsistent for keys {:?}", keys);
    }
}

#[test]
fn test_column_origin_through_join_and_project() {
    let mut opt = optimizer();
    let join = RelTree::new(
        RelCore::Join {
            kind: JoinKind::Inner,
            condition: RexExpr::eq(RexExpr::input(2), RexExpr::input(3)),
        },
        emp_row_type().concat(&dept_row_type()),
        TraitSet::empty(),
        vec![RelInput::from(emp_scan()), RelInput::from(dept_scan())],
    );
    let project = RelTree::new(
        RelCore::Project {
            exprs: vec![RexExpr::input(1)],
        },
        RelRowType::new(vec![RelField::new("ename", SqlType::Varchar, false)]),
        TraitSet::empty(),
        vec![RelInput::from(join)],
    );
    let reg = opt.ensure_registered(project, None).unwrap();

    let md = opt.metadata();
    assert_eq!(
        md.column_origins(reg.rel, 0),
        Some(vec![ColumnOrigin {
            table: emp(),
            column: 1,
            derived: false,
        }])
    );
}

#[test]
fn test_average_sizes_are_type_driven() {
    let mut opt = optimizer();
    let reg = opt.ensure_registered(emp_scan(), None).unwrap();
    let md = opt.metadata();
    // Integer 4 + Varchar 12 + Integer 4.
    assert_eq!(md.average_column_sizes(reg.rel), Some(vec![4.0, 12.0, 4.0]));
    assert_eq!(md.average_row_size(reg.rel), Some(20.0));
}

#[test]
fn test_filter_pulls_up_its_predicate() {
    let mut opt = optimizer();
    let predicate = RexExpr::eq(RexExpr::input(2), RexExpr::int(10));
    let filter = RelTree::new(
        RelCore::Filter {
            predicate: predicate.clone(),
        },
        emp_row_type(),
        TraitSet::empty(),
        vec![RelInput::from(emp_scan())],
    );
    let reg = opt.ensure_registered(filter, None).unwrap();
    let md = opt.metadata();
    assert!(md.predicates(reg.rel).pulled_up.contains(&predicate));
}

#[test]
fn test_parallelism_stubs() {
    let mut opt = optimizer();
    let reg = opt.ensure_registered(emp_scan(), None).unwrap();
    let md = opt.metadata();
    assert_eq!(md.memory(reg.rel), None);
    assert_eq!(md.cumulative_memory_within_phase(reg.rel), None);
    assert_eq!(md.split_count(reg.rel), Some(1.0));
    assert_eq!(md.is_phase_transition(reg.rel), Some(false));
}

#[test]
fn test_cumulative_cost_covers_child_best() {
    let mut opt = optimizer();
    let scan_reg = opt.ensure_registered(emp_scan(), None).unwrap();
    let filter = RelTree::new(
        RelCore::Filter {
            predicate: RexExpr::eq(RexExpr::input(2), RexExpr::int(10)),
        },
        emp_row_type(),
        TraitSet::empty(),
        vec![RelInput::Subset(scan_reg.subset)],
    );
    let filter_reg = opt.ensure_registered(filter, None).unwrap();

    let md = opt.metadata();
    let cumulative = md.cumulative_cost(filter_reg.rel);
    let child_best = md.subset_best_cost(scan_reg.subset);
    assert!(!cumulative.is_infinite());
    assert!(!child_best.is_infinite());
    assert!(cumulative >= child_best);
}

#[test]
fn test_reregistration_is_idempotent() {
    let mut opt = optimizer();
    let first = opt.ensure_registered(emp_scan(), None).unwrap();
    let timestamp = opt.memo().timestamp();
    let second = opt.ensure_registered(emp_scan(), None).unwrap();
    assert!(!second.new_node);
    assert_eq!(first.rel, second.rel);
    assert_eq!(first.subset, second.subset);
    assert_eq!(opt.memo().timestamp(), timestamp);
}

#[test]
fn test_row_type_mismatch_on_equivalence_is_invalid_state() {
    let mut opt = optimizer();
    let scan = opt.ensure_registered(emp_scan(), None).unwrap();
    let err = opt
        .ensure_registered(dept_scan(), Some(scan.rel))
        .unwrap_err();
    assert!(matches!(err, OptError::InvalidState(_)));
}

/// Counts selectivity handler invocations while answering like the default
/// provider; chained in front of it for everything else.
struct CountingSelectivityProvider {
    hits: Arc<AtomicUsize>,
}

impl MetadataProvider for CountingSelectivityProvider {
    fn handler(&self, kind: MetadataKind, _variant: RelKind) -> Option<MdHandler> {
        if kind != MetadataKind::Selectivity {
            return None;
        }
        let hits = self.hits.clone();
        Some(Arc::new(move |_md, _rel, args| {
            hits.fetch_add(1, Ordering::Relaxed);
            let MdArgs::Predicate(predicate) = args else {
                return None;
            };
            Some(MdValue::Double(guess_selectivity(predicate.as_ref())))
        }))
    }
}

#[test]
fn test_cache_invalidates_on_timestamp_advance() {
    let mut opt = optimizer();
    let hits = Arc::new(AtomicUsize::new(0));
    opt.set_metadata_provider(Arc::new(ChainedProvider::new(vec![
        Arc::new(CountingSelectivityProvider { hits: hits.clone() }),
        Arc::new(DefaultMetadataProvider::new()),
    ])));

    let reg = opt.ensure_registered(emp_scan(), None).unwrap();
    let predicate = RexExpr::eq(RexExpr::input(0), RexExpr::int(1));

    let first = opt.metadata().selectivity(reg.rel, Some(&predicate));
    let second = opt.metadata().selectivity(reg.rel, Some(&predicate));
    assert_eq!(first, second, "same timestamp must give identical values");
    assert_eq!(hits.load(Ordering::Relaxed), 1, "second query hits the cache");

    // Any memo mutation advances the timestamp and invalidates the entry.
    opt.ensure_registered(dept_scan(), None).unwrap();
    let third = opt.metadata().selectivity(reg.rel, Some(&predicate));
    assert_eq!(first, third);
    assert_eq!(hits.load(Ordering::Relaxed), 2, "stale entry is recomputed");
}
