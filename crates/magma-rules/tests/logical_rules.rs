//! End-to-end runs of the transformation rules under the default cost
//! model: predicate merging beats a separate filter, stacked projections
//! collapse, and the listener hooks observe the search.

use magma_core::catalog::InMemoryCatalog;
use magma_core::cost::DefaultCostModel;
use magma_core::error::OptError;
use magma_core::optimizer::{CancelToken, Optimizer, OptimizerListener};
use magma_core::rel::{JoinKind, RelCore, RelInput, RelKind, RelNodeId, RelTree, SetId};
use magma_core::scalar::{RexExpr, ScalarValue};
use magma_core::traits::{TraitAxis, TraitSet, TraitValue};
use magma_core::types::{RelField, RelRowType, SqlType, TableRef};
use magma_rules::{default_rules, physical};
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

fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(&emp(), emp_row_type(), 14.0);
    catalog.add_unique_key(&emp(), vec![0]);
    catalog.add_table(&dept(), dept_row_type(), 4.0);
    catalog.add_unique_key(&dept(), vec![0]);
    catalog
}

fn optimizer() -> Optimizer {
    let mut opt = Optimizer::new(Arc::new(catalog()), Arc::new(DefaultCostModel));
    opt.add_trait_axis(TraitAxis::Collation);
    opt.add_trait_axis(TraitAxis::Convention);
    for rule in default_rules() {
        opt.add_rule(rule);
    }
    opt
}

fn scan(table: TableRef, row_type: RelRowType) -> RelTree {
    RelTree::new(
        RelCore::TableScan { table },
        row_type,
        TraitSet::empty(),
        vec![],
    )
}

/// Filter(emp.deptno = dept.deptno) over Join(emp, dept, TRUE).
fn filter_over_cross_join() -> RelTree {
    let join = RelTree::new(
        RelCore::Join {
            kind: JoinKind::Inner,
            condition: RexExpr::Literal(ScalarValue::Bool(true)),
        },
        emp_row_type().concat(&dept_row_type()),
        TraitSet::empty(),
        vec![
            RelInput::from(scan(emp(), emp_row_type())),
            RelInput::from(scan(dept(), dept_row_type())),
        ],
    );
    RelTree::new(
        RelCore::Filter {
            predicate: RexExpr::eq(RexExpr::input(2), RexExpr::input(3)),
        },
        emp_row_type().concat(&dept_row_type()),
        TraitSet::empty(),
        vec![RelInput::from(join)],
    )
}

fn required(opt: &Optimizer) -> TraitSet {
    opt.default_traits()
        .replace(TraitValue::Convention(physical::physical()))
}

#[test]
fn test_filter_merges_into_join() {
    let mut opt = optimizer();
    let required = required(&opt);
    let best = opt
        .optimize(filter_over_cross_join(), &required, &CancelToken::new())
        .expect("physical plan");

    // The winner applies the predicate inside the join; the standalone
    // filter only adds rows-processed cost on top of the same join work.
    assert!(!best.plan.kinds().contains(&RelKind::Filter));
    assert_eq!(
        best.plan.kinds(),
        vec![RelKind::Join, RelKind::TableScan, RelKind::TableScan]
    );
    match &best.plan.core {
        RelCore::Join { condition, .. } => {
            assert!(condition
                .conjuncts()
                .contains(&&RexExpr::eq(RexExpr::input(2), RexExpr::input(3))));
        }
        other => panic!("expected join at the root, got {:?}", other.kind()),
    }
}

#[test]
fn test_stacked_projections_collapse() {
    let mut opt = optimizer();
    let bottom = RelTree::new(
        RelCore::Project {
            exprs: vec![RexExpr::input(1), RexExpr::input(0)],
        },
        RelRowType::new(vec![
            RelField::new("ename", SqlType::Varchar, false),
            RelField::new("empno", SqlType::Integer, false),
        ]),
        TraitSet::empty(),
        vec![RelInput::from(scan(emp(), emp_row_type()))],
    );
    let top = RelTree::new(
        RelCore::Project {
            exprs: vec![RexExpr::input(0)],
        },
        RelRowType::new(vec![RelField::new("ename", SqlType::Varchar, false)]),
        TraitSet::empty(),
        vec![RelInput::from(bottom)],
    );

    let required = required(&opt);
    let best = opt
        .optimize(top, &required, &CancelToken::new())
        .expect("physical plan");

    assert_eq!(best.plan.kinds(), vec![RelKind::Project, RelKind::TableScan]);
    match &best.plan.core {
        RelCore::Project { exprs } => assert_eq!(exprs, &vec![RexExpr::input(1)]),
        other => panic!("expected project at the root, got {:?}", other.kind()),
    }
}

#[derive(Default)]
struct Counters {
    attempted: AtomicUsize,
    produced: AtomicUsize,
    equivalences: AtomicUsize,
}

struct CountingListener(Arc<Counters>);

impl OptimizerListener for CountingListener {
    fn rule_attempted(&mut self, _rule: &str, _rels: &[RelNodeId]) {
        self.0.attempted.fetch_add(1, Ordering::Relaxed);
    }

    fn rule_production(&mut self, _rule: &str, _rel: RelNodeId) {
        self.0.produced.fetch_add(1, Ordering::Relaxed);
    }

    fn rel_equivalence_found(&mut self, _rel: RelNodeId, _set: SetId) {
        self.0.equivalences.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_listener_observes_the_search() {
    let counters = Arc::new(Counters::default());
    let mut opt = optimizer();
    opt.add_listener(Box::new(CountingListener(counters.clone())));

    let required = required(&opt);
    opt.optimize(filter_over_cross_join(), &required, &CancelToken::new())
        .expect("physical plan");

    assert!(counters.attempted.load(Ordering::Relaxed) > 0);
    assert!(counters.produced.load(Ordering::Relaxed) > 0);
    assert!(counters.equivalences.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_excluding_implementation_rules_leaves_no_plan() {
    let mut opt = optimizer();
    opt.set_rule_excluded(Box::new(|name| name.starts_with("Phys")));
    let required = required(&opt);
    let err = opt
        .optimize(filter_over_cross_join(), &required, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        OptError::InfeasibleConversion { .. } | OptError::NoPlanFound { .. }
    ));
}
