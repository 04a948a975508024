//! # Cost Model
//!
//! A cost is a three-component vector `(rows, cpu, io)` with a total order
//! and an additive combinator. Two sentinel values sit outside the finite
//! range: `Tiny` compares below every finite cost and `Huge` above; `Infinite`
//! is absorbing and marks infeasible or not-yet-costed plans.
//!
//! The finite order is lexicographic on `(rows, cpu, io)`: row count
//! dominates, cpu breaks ties, io breaks remaining ties.
//!
//! Self-cost per operator is supplied by the pluggable [`CostModel`]
//! collaborator; when a model has no opinion for a variant the driver falls
//! back to the unit cost `(1, 1, 1)`. Cumulative cost (self plus the best
//! cost of every child subset) is derived by the metadata framework.

use crate::metadata::Metadata;
use crate::rel::{RelCore, RelNode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

/// Estimated expense of a (partial) plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Cost {
    /// Below every finite cost. Returned by models for expressions that
    /// should always win (e.g. trivially removable operators).
    Tiny,
    /// An ordinary finite cost.
    Finite { rows: f64, cpu: f64, io: f64 },
    /// Above every finite cost but still feasible.
    Huge,
    /// Infeasible or unknown; absorbing under addition.
    Infinite,
}

impl Cost {
    /// The additive identity.
    pub const ZERO: Cost = Cost::Finite {
        rows: 0.0,
        cpu: 0.0,
        io: 0.0,
    };

    pub fn finite(rows: f64, cpu: f64, io: f64) -> Cost {
        Cost::Finite { rows, cpu, io }
    }

    /// The default self-cost when a cost model has no entry for a variant.
    pub fn unit() -> Cost {
        Cost::finite(1.0, 1.0, 1.0)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Cost::Infinite)
    }

    /// Row component; sentinels map to the boundary values.
    pub fn rows(&self) -> f64 {
        match self {
            Cost::Tiny => 0.0,
            Cost::Finite { rows, .. } => *rows,
            Cost::Huge | Cost::Infinite => f64::INFINITY,
        }
    }

    fn order_rank(&self) -> u8 {
        match self {
            Cost::Tiny => 0,
            Cost::Finite { .. } => 1,
            Cost::Huge => 2,
            Cost::Infinite => 3,
        }
    }
}

impl Eq for Cost {}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Cost::Finite { rows, cpu, io },
                Cost::Finite {
                    rows: r2,
                    cpu: c2,
                    io: i2,
                },
            ) => rows
                .total_cmp(r2)
                .then_with(|| cpu.total_cmp(c2))
                .then_with(|| io.total_cmp(i2)),
            _ => self.order_rank().cmp(&other.order_rank()),
        }
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, other: Cost) -> Cost {
        match (self, other) {
            (Cost::Infinite, _) | (_, Cost::Infinite) => Cost::Infinite,
            (Cost::Huge, _) | (_, Cost::Huge) => Cost::Huge,
            (Cost::Tiny, x) | (x, Cost::Tiny) => x,
            (
                Cost::Finite { rows, cpu, io },
                Cost::Finite {
                    rows: r2,
                    cpu: c2,
                    io: i2,
                },
            ) => Cost::Finite {
                rows: rows + r2,
                cpu: cpu + c2,
                io: io + i2,
            },
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Tiny => write!(f, "{{tiny}}"),
            Cost::Finite { rows, cpu, io } => {
                write!(f, "{{{} rows, {} cpu, {} io}}", rows, cpu, io)
            }
            Cost::Huge => write!(f, "{{huge}}"),
            Cost::Infinite => write!(f, "{{inf}}"),
        }
    }
}

/// Pluggable per-variant self-cost. `None` means "no opinion" and the driver
/// substitutes the unit cost; abstract converters are costed infinite by the
/// framework regardless of the model.
pub trait CostModel: Send + Sync {
    fn self_cost(&self, md: &Metadata<'_>, rel: &RelNode) -> Option<Cost>;
}

/// Row-count-driven cost model.
///
/// Each variant's cost is a simple function of the estimated row counts of
/// the node and its inputs: scans and filters pay per row produced, joins pay
/// the nested-loop product of their input sizes, sorts pay `n log2 n`
/// comparisons. The io component is unused by the built-in formulas; engines
/// with real storage paths override this model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCostModel;

impl CostModel for DefaultCostModel {
    fn self_cost(&self, md: &Metadata<'_>, rel: &RelNode) -> Option<Cost> {
        let rows = md.row_count(rel.id);
        let cost = match &rel.core {
            RelCore::TableScan { .. } => Cost::finite(rows, rows, 0.0),
            RelCore::Filter { .. } | RelCore::Project { .. } | RelCore::SetOp { .. } => {
                Cost::finite(rows, rows, 0.0)
            }
            RelCore::Join { .. } => {
                let left = md.subset_row_count(rel.inputs[0]);
                let right = md.subset_row_count(rel.inputs[1]);
                Cost::finite(rows, left * right, 0.0)
            }
            RelCore::Aggregate { .. } => {
                let input = md.subset_row_count(rel.inputs[0]);
                Cost::finite(rows, input, 0.0)
            }
            RelCore::Sort { .. } => {
                let n_log_n = if rows > 1.0 { rows * rows.log2() } else { 1.0 };
                Cost::finite(rows, n_log_n, 0.0)
            }
            RelCore::Values { .. } => Cost::finite(rows, rows, 0.0),
            RelCore::Converter => Cost::Infinite,
        };
        Some(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_lexicographic_on_rows_first() {
        let a = Cost::finite(10.0, 100.0, 0.0);
        let b = Cost::finite(11.0, 1.0, 0.0);
        assert!(a < b);
        let c = Cost::finite(10.0, 100.0, 1.0);
        assert!(a < c);
    }

    #[test]
    fn test_sentinels_bracket_finite_costs() {
        let finite = Cost::finite(1e12, 1e12, 1e12);
        assert!(Cost::Tiny < Cost::ZERO);
        assert!(Cost::Tiny < finite);
        assert!(finite < Cost::Huge);
        assert!(Cost::Huge < Cost::Infinite);
    }

    #[test]
    fn test_addition_identities() {
        let a = Cost::finite(2.0, 3.0, 4.0);
        assert_eq!(a + Cost::ZERO, a);
        assert_eq!(a + Cost::Tiny, a);
        assert_eq!(a + Cost::Infinite, Cost::Infinite);
        assert_eq!(a + Cost::Huge, Cost::Huge);
        assert_eq!(Cost::Huge + Cost::Infinite, Cost::Infinite);
        assert_eq!(
            a + Cost::finite(1.0, 1.0, 1.0),
            Cost::finite(3.0, 4.0, 5.0)
        );
    }
}
