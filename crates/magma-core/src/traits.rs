//! # Physical Traits
//!
//! Traits describe physical properties of an expression's output along
//! independent axes. Each axis has a default (weakest) value and a
//! `satisfies` partial order; some axes can also *convert* between values by
//! inserting an enforcer operator.
//!
//! Two axes are built in:
//!
//! - **Convention**: the calling convention an expression is expressed in.
//!   `None` is the logical (unimplemented) convention; physical conventions
//!   are named tags. `satisfies` is equality -- in particular `None`
//!   satisfies nothing physical. There is no built-in conversion: bridges
//!   between conventions are supplied as implementation rules.
//! - **Collation**: the sort order of the output, a list of
//!   `(field, direction, null direction)` entries. `a` satisfies `b` when
//!   `b` is a prefix of `a`. Conversion inserts a `Sort` enforcer.
//!
//! A [`TraitSet`] is an immutable vector with one value per registered axis,
//! kept in a canonical axis order so equal sets compare and hash equal.

use crate::rel::{RelCore, RelInput, RelTree};
use crate::types::RelRowType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calling convention: logical `None` or a named physical variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    None,
    Named(String),
}

impl Convention {
    pub fn named(tag: impl Into<String>) -> Convention {
        Convention::Named(tag.into())
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Convention::Named(_))
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::None => write!(f, "NONE"),
            Convention::Named(tag) => write!(f, "{}", tag),
        }
    }
}

/// Sort direction of one collation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Placement of nulls within one collation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullDirection {
    First,
    Last,
}

/// One field of a collation: output ordinal plus ordering flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollation {
    pub field: usize,
    pub direction: Direction,
    pub null_direction: NullDirection,
}

impl FieldCollation {
    pub fn new(field: usize, direction: Direction, null_direction: NullDirection) -> Self {
        Self {
            field,
            direction,
            null_direction,
        }
    }

    /// Ascending, nulls first -- the common case in the built-in rules.
    pub fn asc(field: usize) -> Self {
        Self::new(field, Direction::Ascending, NullDirection::First)
    }
}

/// An ordering of output rows: the empty collation means "unordered".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelCollation {
    pub fields: Vec<FieldCollation>,
}

impl RelCollation {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(fields: Vec<FieldCollation>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `self` satisfies `other` when `other` is a prefix of `self`: data
    /// sorted on `(a, b)` is also sorted on `(a)`.
    pub fn satisfies(&self, other: &RelCollation) -> bool {
        other.fields.len() <= self.fields.len()
            && other
                .fields
                .iter()
                .zip(self.fields.iter())
                .all(|(o, s)| o == s)
    }
}

impl fmt::Display for RelCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, fc) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let dir = match fc.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            write!(f, "{} {}", fc.field, dir)?;
        }
        write!(f, "]")
    }
}

/// One axis of physical properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraitAxis {
    Convention,
    Collation,
}

impl TraitAxis {
    pub fn name(&self) -> &'static str {
        match self {
            TraitAxis::Convention => "convention",
            TraitAxis::Collation => "collation",
        }
    }

    /// Canonical position of this axis within a trait set.
    pub(crate) fn rank(&self) -> usize {
        match self {
            TraitAxis::Convention => 0,
            TraitAxis::Collation => 1,
        }
    }

    /// The weakest value on this axis; every expression starts here.
    pub fn default_value(&self) -> TraitValue {
        match self {
            TraitAxis::Convention => TraitValue::Convention(Convention::None),
            TraitAxis::Collation => TraitValue::Collation(RelCollation::empty()),
        }
    }

    /// Is value `a` at least as strong as `b` on this axis?
    pub fn satisfies(&self, a: &TraitValue, b: &TraitValue) -> bool {
        match (self, a, b) {
            (TraitAxis::Convention, TraitValue::Convention(a), TraitValue::Convention(b)) => a == b,
            (TraitAxis::Collation, TraitValue::Collation(a), TraitValue::Collation(b)) => {
                a.satisfies(b)
            }
            _ => false,
        }
    }

    /// Build an enforcer that converts `input` (with traits `input_traits`)
    /// to value `to` on this axis, or `None` if the axis cannot convert.
    ///
    /// Collation inserts a `Sort` carrying the target collation and the
    /// input's remaining traits. Convention has no built-in bridge;
    /// implementation rules supply physical expressions directly.
    pub fn convert(
        &self,
        input: RelInput,
        input_traits: &TraitSet,
        row_type: &RelRowType,
        to: &TraitValue,
    ) -> Option<RelTree> {
        match (self, to) {
            (TraitAxis::Collation, TraitValue::Collation(collation)) => Some(RelTree::new(
                RelCore::Sort {
                    collation: collation.clone(),
                    offset: None,
                    fetch: None,
                },
                row_type.clone(),
                input_traits.replace(TraitValue::Collation(collation.clone())),
                vec![input],
            )),
            _ => None,
        }
    }
}

/// A value on one trait axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraitValue {
    Convention(Convention),
    Collation(RelCollation),
}

impl TraitValue {
    pub fn axis(&self) -> TraitAxis {
        match self {
            TraitValue::Convention(_) => TraitAxis::Convention,
            TraitValue::Collation(_) => TraitAxis::Collation,
        }
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraitValue::Convention(c) => write!(f, "{}", c),
            TraitValue::Collation(c) => write!(f, "{}", c),
        }
    }
}

/// Immutable vector of trait values, at most one per axis, in canonical
/// axis order. A set may be *partial* (axes missing) until it is completed
/// against the session's registry or an original expression's traits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitSet {
    values: Vec<TraitValue>,
}

impl TraitSet {
    /// The empty (fully partial) trait set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a trait set from values; later duplicates on an axis win.
    pub fn of(values: Vec<TraitValue>) -> Self {
        let mut ts = TraitSet::empty();
        for v in values {
            ts = ts.replace(v);
        }
        ts
    }

    pub fn values(&self) -> &[TraitValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value on the given axis, if present.
    pub fn get(&self, axis: TraitAxis) -> Option<&TraitValue> {
        self.values.iter().find(|v| v.axis() == axis)
    }

    pub fn convention(&self) -> Option<&Convention> {
        match self.get(TraitAxis::Convention) {
            Some(TraitValue::Convention(c)) => Some(c),
            _ => None,
        }
    }

    pub fn collation(&self) -> Option<&RelCollation> {
        match self.get(TraitAxis::Collation) {
            Some(TraitValue::Collation(c)) => Some(c),
            _ => None,
        }
    }

    /// Return a copy with the value on `value`'s axis replaced (or added).
    pub fn replace(&self, value: TraitValue) -> TraitSet {
        let axis = value.axis();
        let mut values: Vec<TraitValue> = self
            .values
            .iter()
            .filter(|v| v.axis() != axis)
            .cloned()
            .collect();
        let pos = values
            .iter()
            .position(|v| v.axis().rank() > axis.rank())
            .unwrap_or(values.len());
        values.insert(pos, value);
        TraitSet { values }
    }

    /// Elementwise satisfaction: for every value in `other`, this set's value
    /// on the same axis (defaulting when absent) must satisfy it.
    pub fn satisfies(&self, other: &TraitSet) -> bool {
        other.values.iter().all(|required| {
            let axis = required.axis();
            match self.get(axis) {
                Some(provided) => axis.satisfies(provided, required),
                None => axis.satisfies(&axis.default_value(), required),
            }
        })
    }

    /// Fill axes absent here from `fallback` (the trait propagation step of
    /// `transform_to`).
    pub fn completed_from(&self, fallback: &TraitSet) -> TraitSet {
        let mut out = self.clone();
        for v in &fallback.values {
            if out.get(v.axis()).is_none() {
                out = out.replace(v.clone());
            }
        }
        out
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}

/// Per-session list of registered trait axes.
///
/// Axes must be registered before optimization begins; the registry produces
/// the default trait set and completes partial sets to the registered axes.
#[derive(Debug, Clone, Default)]
pub struct TraitRegistry {
    axes: Vec<TraitAxis>,
}

impl TraitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_axis(&mut self, axis: TraitAxis) {
        if !self.axes.contains(&axis) {
            self.axes.push(axis);
        }
    }

    pub fn axes(&self) -> &[TraitAxis] {
        &self.axes
    }

    pub fn is_registered(&self, axis: TraitAxis) -> bool {
        self.axes.contains(&axis)
    }

    /// Trait set holding every registered axis's default value.
    pub fn default_traits(&self) -> TraitSet {
        let mut ts = TraitSet::empty();
        for axis in &self.axes {
            ts = ts.replace(axis.default_value());
        }
        ts
    }

    /// Complete a partial set: absent registered axes get their defaults.
    pub fn complete(&self, partial: &TraitSet) -> TraitSet {
        partial.completed_from(&self.default_traits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TraitRegistry {
        let mut r = TraitRegistry::new();
        r.add_axis(TraitAxis::Collation);
        r.add_axis(TraitAxis::Convention);
        r
    }

    #[test]
    fn test_collation_prefix_satisfies() {
        let ab = RelCollation::of(vec![FieldCollation::asc(0), FieldCollation::asc(1)]);
        let a = RelCollation::of(vec![FieldCollation::asc(0)]);
        assert!(ab.satisfies(&a));
        assert!(!a.satisfies(&ab));
        assert!(a.satisfies(&RelCollation::empty()));
    }

    #[test]
    fn test_convention_none_satisfies_nothing_physical() {
        let axis = TraitAxis::Convention;
        let none = TraitValue::Convention(Convention::None);
        let phys = TraitValue::Convention(Convention::named("PHYSICAL"));
        assert!(axis.satisfies(&none, &none));
        assert!(!axis.satisfies(&none, &phys));
        assert!(axis.satisfies(&phys, &phys));
        assert!(!axis.satisfies(&phys, &none));
    }

    #[test]
    fn test_replace_is_canonical() {
        // Insertion order must not matter for equality.
        let a = TraitSet::empty()
            .replace(TraitValue::Collation(RelCollation::empty()))
            .replace(TraitValue::Convention(Convention::None));
        let b = TraitSet::empty()
            .replace(TraitValue::Convention(Convention::None))
            .replace(TraitValue::Collation(RelCollation::empty()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_complete_fills_defaults() {
        let r = registry();
        let partial = TraitSet::of(vec![TraitValue::Convention(Convention::named("PHYSICAL"))]);
        let full = r.complete(&partial);
        assert_eq!(full.len(), 2);
        assert_eq!(full.collation(), Some(&RelCollation::empty()));
        assert!(full.convention().is_some_and(Convention::is_physical));
    }

    #[test]
    fn test_satisfies_elementwise() {
        let r = registry();
        let physical = r
            .default_traits()
            .replace(TraitValue::Convention(Convention::named("PHYSICAL")));
        let sorted = physical.replace(TraitValue::Collation(RelCollation::of(vec![
            FieldCollation::asc(0),
        ])));
        assert!(sorted.satisfies(&physical));
        assert!(!physical.satisfies(&sorted));
        assert!(!r.default_traits().satisfies(&physical));
    }
}
