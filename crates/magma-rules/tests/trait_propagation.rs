//! End-to-end trait propagation through the physical rule set.
//!
//! An aggregate demands its input collated on the group key. When the table
//! declares that collation and the projection preserves it, the winner needs
//! no sort; when the projection re-orders columns, a sort enforcer must
//! appear and the plan costs one more unit.

use magma_core::catalog::InMemoryCatalog;
use magma_core::cost::{Cost, CostModel};
use magma_core::metadata::Metadata;
use magma_core::optimizer::{CancelToken, Optimizer};
use magma_core::rel::{AggCall, AggFunc, RelCore, RelInput, RelKind, RelNode, RelTree};
use magma_core::rule::Rule;
use magma_core::scalar::RexExpr;
use magma_core::traits::{
    Convention, FieldCollation, RelCollation, TraitAxis, TraitSet, TraitValue,
};
use magma_core::types::{RelField, RelRowType, SqlType, TableRef};
use magma_rules::physical::{self, PhysAggRule, PhysProjectRule, PhysScanRule, PhysSortRule};
use std::sync::Arc;

/// Every operator costs `(1, 1, 1)`, so cumulative cost counts plan nodes.
struct UnitCostModel;

impl CostModel for UnitCostModel {
    fn self_cost(&self, _md: &Metadata<'_>, _rel: &RelNode) -> Option<Cost> {
        None
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn t1() -> TableRef {
    TableRef::new("s", "t1")
}

fn t1_row_type() -> RelRowType {
    RelRowType::new(vec![
        RelField::new("s", SqlType::Varchar, false),
        RelField::new("i", SqlType::Integer, false),
    ])
}

/// t1 declares its scan output sorted on column 0 ascending, nulls first.
fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(&t1(), t1_row_type(), 100.0);
    catalog.add_collation(&t1(), RelCollation::of(vec![FieldCollation::asc(0)]));
    catalog
}

fn optimizer() -> Optimizer {
    let mut opt = Optimizer::new(Arc::new(catalog()), Arc::new(UnitCostModel));
    opt.add_trait_axis(TraitAxis::Collation);
    opt.add_trait_axis(TraitAxis::Convention);
    let rules: Vec<Arc<dyn Rule>> = vec![
        Arc::new(PhysAggRule),
        Arc::new(PhysProjectRule),
        Arc::new(PhysScanRule),
        Arc::new(PhysSortRule),
        Arc::new(magma_core::convert::ExpandConversionRule),
    ];
    for rule in rules {
        opt.add_rule(rule);
    }
    opt
}

/// Aggregate(group = {0}, count) over Project(exprs) over Scan(t1).
fn root(project_exprs: Vec<RexExpr>, project_type: RelRowType, agg_type: RelRowType) -> RelTree {
    let scan = RelTree::new(
        RelCore::TableScan { table: t1() },
        t1_row_type(),
        TraitSet::empty(),
        vec![],
    );
    let project = RelTree::new(
        RelCore::Project {
            exprs: project_exprs,
        },
        project_type,
        TraitSet::empty(),
        vec![RelInput::from(scan)],
    );
    RelTree::new(
        RelCore::Aggregate {
            group_keys: vec![0],
            calls: vec![AggCall::new(AggFunc::Count, vec![1], "cnt")],
        },
        agg_type,
        TraitSet::empty(),
        vec![RelInput::from(project)],
    )
}

fn required(opt: &Optimizer) -> TraitSet {
    opt.default_traits()
        .replace(TraitValue::Convention(physical::physical()))
}

#[test]
fn test_sortedness_propagates_through_identity_project() {
    init_tracing();
    let mut opt = optimizer();
    let tree = root(
        vec![RexExpr::input(0), RexExpr::input(1)],
        t1_row_type(),
        RelRowType::new(vec![
            RelField::new("s", SqlType::Varchar, false),
            RelField::new("cnt", SqlType::BigInt, false),
        ]),
    );
    let required = required(&opt);
    let best = opt
        .optimize(tree, &required, &CancelToken::new())
        .expect("physical plan");

    // Sortedness was propagated: no sort node, three operators at unit cost.
    assert_eq!(best.cost, Cost::finite(3.0, 3.0, 3.0));
    assert_eq!(
        best.plan.kinds(),
        vec![RelKind::Aggregate, RelKind::Project, RelKind::TableScan]
    );
    assert!(best.plan.traits.satisfies(&required));
    // The aggregate inherits the group-key collation on its output.
    assert_eq!(
        best.plan.traits.collation(),
        Some(&RelCollation::of(vec![FieldCollation::asc(0)]))
    );
}

#[test]
fn test_aliasing_project_forces_a_sort() {
    init_tracing();
    let mut opt = optimizer();
    // Project(i, s): the declared collation on column 0 surfaces at output
    // position 1, which does not satisfy the aggregate's requirement.
    let tree = root(
        vec![RexExpr::input(1), RexExpr::input(0)],
        RelRowType::new(vec![
            RelField::new("i", SqlType::Integer, false),
            RelField::new("s", SqlType::Varchar, false),
        ]),
        RelRowType::new(vec![
            RelField::new("i", SqlType::Integer, false),
            RelField::new("cnt", SqlType::BigInt, false),
        ]),
    );
    let required = required(&opt);
    let best = opt
        .optimize(tree, &required, &CancelToken::new())
        .expect("physical plan");

    assert_eq!(best.cost, Cost::finite(4.0, 4.0, 4.0));
    assert_eq!(
        best.plan.kinds(),
        vec![
            RelKind::Aggregate,
            RelKind::Sort,
            RelKind::Project,
            RelKind::TableScan
        ]
    );
    assert!(best.plan.traits.satisfies(&required));

    // The enforcer sort materializes the aggregate's input collation.
    let sort = &best.plan.inputs[0];
    assert_eq!(
        sort.traits.collation(),
        Some(&RelCollation::of(vec![FieldCollation::asc(0)]))
    );
    assert!(sort
        .traits
        .convention()
        .is_some_and(Convention::is_physical));
}

#[test]
fn test_same_session_inputs_give_same_plan() {
    init_tracing();
    let run = || {
        let mut opt = optimizer();
        let tree = root(
            vec![RexExpr::input(0), RexExpr::input(1)],
            t1_row_type(),
            RelRowType::new(vec![
                RelField::new("s", SqlType::Varchar, false),
                RelField::new("cnt", SqlType::BigInt, false),
            ]),
        );
        let required = required(&opt);
        opt.optimize(tree, &required, &CancelToken::new())
            .expect("physical plan")
    };
    let a = run();
    let b = run();
    assert_eq!(a.cost, b.cost);
    assert_eq!(a.plan, b.plan);
}
