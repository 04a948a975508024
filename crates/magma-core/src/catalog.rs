//! # Catalog Interface
//!
//! The narrow schema lookup contract the optimizer assumes: per-table row
//! types, a row-count statistic, unique keys, and declared collations
//! (physical sort orders the table guarantees, e.g. from clustered storage).
//!
//! The trait is intentionally minimal and behind a trait object so that
//! different backends can supply metadata. For embedding and tests,
//! [`InMemoryCatalog`] provides a HashMap-backed implementation populated
//! programmatically.

use crate::traits::RelCollation;
use crate::types::{RelRowType, TableRef};
use std::collections::HashMap;

/// Row count assumed for tables without statistics.
pub const DEFAULT_TABLE_ROW_COUNT: f64 = 1000.0;

/// Schema and statistics lookups for table scans.
pub trait Catalog: Send + Sync {
    /// Column definitions, or `None` if the table is unknown.
    fn row_type(&self, table: &TableRef) -> Option<RelRowType>;

    /// Row-count statistic, or `None` if unknown.
    fn row_count(&self, table: &TableRef) -> Option<f64>;

    /// Unique keys as sets of column ordinals. Empty means "none known".
    fn unique_keys(&self, table: &TableRef) -> Vec<Vec<usize>>;

    /// Sort orders the table's scan output is declared to satisfy.
    fn collations(&self, table: &TableRef) -> Vec<RelCollation>;
}

#[derive(Debug, Clone)]
struct TableEntry {
    row_type: RelRowType,
    row_count: Option<f64>,
    unique_keys: Vec<Vec<usize>>,
    collations: Vec<RelCollation>,
}

/// In-memory catalog for embedding and tests, keyed by `schema.table`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, TableEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, row_type: RelRowType, row_count: f64) {
        self.tables.insert(
            table.qualified(),
            TableEntry {
                row_type,
                row_count: Some(row_count),
                unique_keys: Vec::new(),
                collations: Vec::new(),
            },
        );
    }

    /// Declare a unique key (set of column ordinals) on a registered table.
    pub fn add_unique_key(&mut self, table: &TableRef, key: Vec<usize>) {
        if let Some(entry) = self.tables.get_mut(&table.qualified()) {
            entry.unique_keys.push(key);
        }
    }

    /// Declare a collation the table's scan output satisfies.
    pub fn add_collation(&mut self, table: &TableRef, collation: RelCollation) {
        if let Some(entry) = self.tables.get_mut(&table.qualified()) {
            entry.collations.push(collation);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn row_type(&self, table: &TableRef) -> Option<RelRowType> {
        self.tables.get(&table.qualified()).map(|t| t.row_type.clone())
    }

    fn row_count(&self, table: &TableRef) -> Option<f64> {
        self.tables.get(&table.qualified()).and_then(|t| t.row_count)
    }

    fn unique_keys(&self, table: &TableRef) -> Vec<Vec<usize>> {
        self.tables
            .get(&table.qualified())
            .map(|t| t.unique_keys.clone())
            .unwrap_or_default()
    }

    fn collations(&self, table: &TableRef) -> Vec<RelCollation> {
        self.tables
            .get(&table.qualified())
            .map(|t| t.collations.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RelField, SqlType};

    #[test]
    fn test_in_memory_catalog_lookups() {
        let mut catalog = InMemoryCatalog::new();
        let t = TableRef::new("s", "emp");
        catalog.add_table(
            &t,
            RelRowType::new(vec![RelField::new("empno", SqlType::Integer, false)]),
            14.0,
        );
        catalog.add_unique_key(&t, vec![0]);

        assert_eq!(catalog.row_count(&t), Some(14.0));
        assert_eq!(catalog.unique_keys(&t), vec![vec![0]]);
        assert!(catalog.row_count(&TableRef::new("s", "missing")).is_none());
        assert!(catalog.collations(&t).is_empty());
    }
}
