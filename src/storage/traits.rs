//! Storage traits consumed by the reasoner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concept::{Concept, ConceptMap, EntityId};
use crate::pattern::Atom;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A lock guarding the backend was poisoned.
    #[error("Poisoned lock: {0}")]
    PoisonedLock(&'static str),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One stored fact: an edge from an entity through a predicate to a concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    /// Source entity.
    pub subject: EntityId,
    /// Predicate name.
    pub predicate: String,
    /// Target concept.
    pub object: Concept,
}

impl Fact {
    /// Construct a fact.
    #[must_use]
    pub fn new(subject: EntityId, predicate: impl Into<String>, object: impl Into<Concept>) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// Lazy traversal over matching facts.
///
/// The iterator must never block; `next` is called inside actor handlers.
pub type TraversalIter = Box<dyn Iterator<Item = ConceptMap> + Send>;

/// Storage trait for the fact graph.
///
/// Implementations must be safe for concurrent readers; the reasoner scans
/// from many executor threads at once.
pub trait FactStore: Send + Sync {
    /// Insert a fact.
    fn insert(&self, fact: Fact) -> Result<(), StorageError>;

    /// Scan facts matching `atom` under `bounds`.
    ///
    /// Every produced map binds all of `atom`'s variables and carries the
    /// bound variables through unchanged.
    fn scan(&self, atom: &Atom, bounds: &ConceptMap) -> Result<TraversalIter, StorageError>;

    /// Number of stored facts.
    fn len(&self) -> Result<usize, StorageError>;

    /// True when no facts are stored.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
