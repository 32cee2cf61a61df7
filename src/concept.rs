//! Concepts and answer bindings.
//!
//! A [`Concept`] is anything a query variable can bind to: a graph entity or
//! a scalar attribute value. A [`ConceptMap`] is one complete answer, mapping
//! variables to concepts. Answers are immutable once recorded and are
//! deduplicated by hash inside recursive nodes, which is why every concept
//! variant is `Eq + Hash`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named query variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(String);

impl Variable {
    /// Creates a variable with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Possible values a variable can bind to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Concept {
    /// A graph entity.
    Entity(EntityId),
    /// A boolean attribute.
    Bool(bool),
    /// An integer attribute.
    Int(i64),
    /// A string attribute.
    String(String),
}

impl Concept {
    /// The entity behind this concept, if it is one.
    #[must_use]
    pub const fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity({id})"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<i64> for Concept {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Concept {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<EntityId> for Concept {
    fn from(id: EntityId) -> Self {
        Self::Entity(id)
    }
}

/// One answer: an immutable variable→concept binding.
///
/// Backed by a `BTreeMap` so iteration order, equality, and hashing are
/// deterministic across nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptMap {
    bindings: BTreeMap<Variable, Concept>,
}

impl ConceptMap {
    /// The empty binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concept bound to `var`, if any.
    #[must_use]
    pub fn get(&self, var: &Variable) -> Option<&Concept> {
        self.bindings.get(var)
    }

    /// True when `var` is bound.
    #[must_use]
    pub fn contains(&self, var: &Variable) -> bool {
        self.bindings.contains_key(var)
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when no variable is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate over the bindings in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Concept)> {
        self.bindings.iter()
    }

    /// Bind `var` to `concept`, replacing any previous binding.
    pub fn bind(&mut self, var: Variable, concept: Concept) {
        self.bindings.insert(var, concept);
    }

    /// Builder-style [`bind`](Self::bind).
    #[must_use]
    pub fn with(mut self, var: impl Into<Variable>, concept: impl Into<Concept>) -> Self {
        self.bind(var.into(), concept.into());
        self
    }

    /// Merge two bindings.
    ///
    /// Returns `None` when the maps disagree on a shared variable.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let mut merged = self.clone();
        for (var, concept) in &other.bindings {
            if let Some(existing) = merged.bindings.get(var) {
                if existing != concept {
                    return None;
                }
            } else {
                merged.bindings.insert(var.clone(), concept.clone());
            }
        }
        Some(merged)
    }

    /// The sub-binding covering only `vars`.
    #[must_use]
    pub fn restrict<'a>(&self, vars: impl IntoIterator<Item = &'a Variable>) -> Self {
        let mut restricted = Self::new();
        for var in vars {
            if let Some(concept) = self.bindings.get(var) {
                restricted.bindings.insert(var.clone(), concept.clone());
            }
        }
        restricted
    }
}

impl fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, concept)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var}={concept}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(Variable, Concept)> for ConceptMap {
    fn from_iter<T: IntoIterator<Item = (Variable, Concept)>>(iter: T) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_disjoint_bindings() {
        let a = ConceptMap::new().with("x", 1);
        let b = ConceptMap::new().with("y", 2);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.get(&Variable::named("x")), Some(&Concept::Int(1)));
        assert_eq!(merged.get(&Variable::named("y")), Some(&Concept::Int(2)));
    }

    #[test]
    fn merge_agreeing_overlap() {
        let a = ConceptMap::new().with("x", 1).with("y", 2);
        let b = ConceptMap::new().with("y", 2).with("z", 3);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn merge_conflicting_overlap_fails() {
        let a = ConceptMap::new().with("x", 1);
        let b = ConceptMap::new().with("x", 2);
        assert!(a.merge(&b).is_none());
    }

    #[test]
    fn restrict_keeps_only_requested_vars() {
        let map = ConceptMap::new().with("x", 1).with("y", 2);
        let x = Variable::named("x");
        let restricted = map.restrict([&x]);
        assert_eq!(restricted.len(), 1);
        assert!(restricted.contains(&x));
    }

    #[test]
    fn equal_maps_hash_equal() {
        use std::collections::HashSet;
        let a = ConceptMap::new().with("x", 1).with("y", "v");
        let b = ConceptMap::new().with("y", "v").with("x", 1);
        let mut seen = HashSet::new();
        seen.insert(a);
        assert!(seen.contains(&b));
    }

    #[test]
    fn serde_round_trip() {
        let map = ConceptMap::new().with("x", 42).with("e", EntityId::new());
        let json = serde_json::to_string(&map).unwrap();
        let back: ConceptMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
