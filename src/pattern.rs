//! Pattern atoms and conjunctions.
//!
//! A query is a conjunction of triple atoms over the fact graph. Atoms are
//! the unit the planner compiles into resolvables; conjunctions are the unit
//! the reasoner evaluates.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::concept::{Concept, ConceptMap, Variable};
use crate::error::ValidationError;

/// A term position in an atom: either a variable or a fixed concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "term", rename_all = "snake_case")]
pub enum Term {
    /// An unbound position.
    Var(Variable),
    /// A constant position.
    Concept(Concept),
}

impl Term {
    /// Creates a variable term.
    #[must_use]
    pub fn var(name: impl Into<Variable>) -> Self {
        Self::Var(name.into())
    }

    /// The variable at this position, if any.
    #[must_use]
    pub const fn as_var(&self) -> Option<&Variable> {
        match self {
            Self::Var(v) => Some(v),
            Self::Concept(_) => None,
        }
    }

    /// Resolve this term under `bindings`: constants stay, bound variables
    /// become their concept, unbound variables stay variables.
    #[must_use]
    pub fn substitute(&self, bindings: &ConceptMap) -> Self {
        match self {
            Self::Var(v) => bindings
                .get(v)
                .map_or_else(|| self.clone(), |c| Self::Concept(c.clone())),
            Self::Concept(_) => self.clone(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => write!(f, "{v}"),
            Self::Concept(c) => write!(f, "{c}"),
        }
    }
}

/// A triple pattern over the fact graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    /// Subject position.
    pub subject: Term,
    /// Predicate name; always constant.
    pub predicate: String,
    /// Object position.
    pub object: Term,
}

impl Atom {
    /// Construct an atom, validating the predicate.
    pub fn new(
        subject: Term,
        predicate: impl Into<String>,
        object: Term,
    ) -> Result<Self, ValidationError> {
        let predicate = predicate.into();
        if predicate.trim().is_empty() {
            return Err(ValidationError::EmptyPredicate);
        }
        Ok(Self {
            subject,
            predicate,
            object,
        })
    }

    /// The variables appearing in this atom, in position order.
    #[must_use]
    pub fn variables(&self) -> Vec<Variable> {
        [&self.subject, &self.object]
            .into_iter()
            .filter_map(|t| t.as_var().cloned())
            .collect()
    }

    /// The atom with every bound variable replaced by its concept.
    #[must_use]
    pub fn substitute(&self, bindings: &ConceptMap) -> Self {
        Self {
            subject: self.subject.substitute(bindings),
            predicate: self.predicate.clone(),
            object: self.object.substitute(bindings),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

/// An ordered conjunction of atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conjunction {
    atoms: Vec<Atom>,
}

impl Conjunction {
    /// Construct a conjunction, rejecting the empty one.
    pub fn new(atoms: Vec<Atom>) -> Result<Self, ValidationError> {
        if atoms.is_empty() {
            return Err(ValidationError::EmptyConjunction);
        }
        Ok(Self { atoms })
    }

    /// The atoms in evaluation order.
    #[must_use]
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// The set of variables bound by a full answer to this conjunction.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atoms.iter().flat_map(Atom::variables).collect()
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{atom}")?;
        }
        Ok(())
    }
}
