//! # Row Types
//!
//! Every relational expression produces rows of a fixed shape, described by a
//! [`RelRowType`]: an ordered list of named, typed, nullability-tagged
//! fields. All members of a memo set share one row type; the memo enforces
//! this at registration time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Fully qualified `schema.name` form, used as a catalog key.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// SQL type tags for row fields.
///
/// The set is deliberately small: the optimizer never evaluates values, it
/// only needs enough type information for size estimation and row-type
/// equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Varchar,
    Date,
}

impl SqlType {
    /// Default average width in bytes of a value of this type, used by the
    /// average-size metadata when no better estimate exists.
    pub fn average_width(&self) -> f64 {
        match self {
            SqlType::Boolean => 1.0,
            SqlType::Integer => 4.0,
            SqlType::BigInt => 8.0,
            SqlType::Double => 8.0,
            SqlType::Varchar => 12.0,
            SqlType::Date => 4.0,
        }
    }
}

/// A single field of a row type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelField {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl RelField {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
        }
    }
}

/// Ordered list of fields describing the rows an expression produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelRowType {
    pub fields: Vec<RelField>,
}

impl RelRowType {
    pub fn new(fields: Vec<RelField>) -> Self {
        Self { fields }
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, i: usize) -> &RelField {
        &self.fields[i]
    }

    /// Row type of a join output: left fields followed by right fields.
    pub fn concat(&self, other: &RelRowType) -> RelRowType {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        RelRowType { fields }
    }
}

impl fmt::Display for RelRowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {:?}", field.name, field.sql_type)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_preserves_order() {
        let left = RelRowType::new(vec![
            RelField::new("a", SqlType::Integer, false),
            RelField::new("b", SqlType::Varchar, true),
        ]);
        let right = RelRowType::new(vec![RelField::new("c", SqlType::BigInt, false)]);
        let joined = left.concat(&right);
        assert_eq!(joined.arity(), 3);
        assert_eq!(joined.field(2).name, "c");
    }
}
