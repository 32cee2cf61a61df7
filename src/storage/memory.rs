//! In-memory fact store.
//!
//! Thread-safe reference implementation of [`FactStore`] for embedded usage
//! and tests. Scans snapshot the matching facts under a read lock and yield
//! lazily from the snapshot, so traversal never blocks inside a handler.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::concept::{Concept, ConceptMap};
use crate::pattern::{Atom, Term};
use crate::storage::traits::{Fact, FactStore, StorageError, TraversalIter};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::PoisonedLock(context)
}

#[derive(Debug, Default)]
struct Indexed {
    facts: Vec<Fact>,
    by_predicate: HashMap<String, Vec<usize>>,
}

/// In-memory [`FactStore`] with a predicate index.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    inner: RwLock<Indexed>,
}

impl InMemoryFactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-insert a collection of facts.
    pub fn extend(&self, facts: impl IntoIterator<Item = Fact>) -> Result<(), StorageError> {
        for fact in facts {
            self.insert(fact)?;
        }
        Ok(())
    }
}

/// Binds one atom position against one fact position.
///
/// Returns false when a constant clashes or a variable is already bound to a
/// different concept.
fn bind_position(term: &Term, concept: &Concept, answer: &mut ConceptMap) -> bool {
    match term {
        Term::Concept(expected) => expected == concept,
        Term::Var(var) => match answer.get(var) {
            Some(existing) => existing == concept,
            None => {
                answer.bind(var.clone(), concept.clone());
                true
            }
        },
    }
}

impl FactStore for InMemoryFactStore {
    fn insert(&self, fact: Fact) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| lock_err("facts"))?;
        let idx = inner.facts.len();
        inner
            .by_predicate
            .entry(fact.predicate.clone())
            .or_default()
            .push(idx);
        inner.facts.push(fact);
        Ok(())
    }

    fn scan(&self, atom: &Atom, bounds: &ConceptMap) -> Result<TraversalIter, StorageError> {
        let bound_atom = atom.substitute(bounds);
        let inner = self.inner.read().map_err(|_| lock_err("facts"))?;
        let candidates: Vec<Fact> = inner
            .by_predicate
            .get(&bound_atom.predicate)
            .map(|positions| positions.iter().map(|&i| inner.facts[i].clone()).collect())
            .unwrap_or_default();
        drop(inner);

        let bounds = bounds.clone();
        let iter = candidates.into_iter().filter_map(move |fact| {
            let mut answer = bounds.clone();
            let subject = Concept::Entity(fact.subject);
            if bind_position(&bound_atom.subject, &subject, &mut answer)
                && bind_position(&bound_atom.object, &fact.object, &mut answer)
            {
                Some(answer)
            } else {
                None
            }
        });
        Ok(Box::new(iter))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.inner.read().map_err(|_| lock_err("facts"))?.facts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{EntityId, Variable};

    fn edge_atom() -> Atom {
        Atom::new(Term::var("x"), "edge", Term::var("y")).unwrap()
    }

    #[test]
    fn scan_by_predicate() {
        let store = InMemoryFactStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        store.insert(Fact::new(a, "edge", b)).unwrap();
        store.insert(Fact::new(a, "label", "root")).unwrap();

        let answers: Vec<_> = store.scan(&edge_atom(), &ConceptMap::new()).unwrap().collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].get(&Variable::named("x")),
            Some(&Concept::Entity(a))
        );
        assert_eq!(
            answers[0].get(&Variable::named("y")),
            Some(&Concept::Entity(b))
        );
    }

    #[test]
    fn scan_honours_bounds() {
        let store = InMemoryFactStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        let c = EntityId::new();
        store.insert(Fact::new(a, "edge", b)).unwrap();
        store.insert(Fact::new(b, "edge", c)).unwrap();

        let bounds = ConceptMap::new().with("x", b);
        let answers: Vec<_> = store.scan(&edge_atom(), &bounds).unwrap().collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].get(&Variable::named("y")),
            Some(&Concept::Entity(c))
        );
        // Bounds are carried through into the answer.
        assert_eq!(
            answers[0].get(&Variable::named("x")),
            Some(&Concept::Entity(b))
        );
    }

    #[test]
    fn scan_repeated_variable_requires_equal_positions() {
        let store = InMemoryFactStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        store.insert(Fact::new(a, "edge", a)).unwrap();
        store.insert(Fact::new(a, "edge", b)).unwrap();

        let self_loop = Atom::new(Term::var("x"), "edge", Term::var("x")).unwrap();
        let answers: Vec<_> = store.scan(&self_loop, &ConceptMap::new()).unwrap().collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].get(&Variable::named("x")),
            Some(&Concept::Entity(a))
        );
    }

    #[test]
    fn constant_object_filters() {
        let store = InMemoryFactStore::new();
        let a = EntityId::new();
        store.insert(Fact::new(a, "age", 30)).unwrap();
        store.insert(Fact::new(a, "age", 31)).unwrap();

        let atom = Atom::new(Term::var("x"), "age", Term::Concept(Concept::Int(31))).unwrap();
        let answers: Vec<_> = store.scan(&atom, &ConceptMap::new()).unwrap().collect();
        assert_eq!(answers.len(), 1);
    }
}
